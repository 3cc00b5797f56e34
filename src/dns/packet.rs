use bitstream_io::{BigEndian, BitReader, BitWrite, BitWriter};

use super::common::PacketComponent;
use super::{DNSHeader, DNSQuestion, DNSResource, ParseError};

/// A fully parsed, owned DNS message: header plus the four sections.
///
/// `resources` holds the additional section (named to avoid colliding with
/// `Vec::additional`, which doesn't exist, while still reading sensibly next
/// to `answers`/`authorities`).
#[derive(
    Clone,
    Debug,
    Default,
    PartialEq,
    serde::Serialize,
    serde::Deserialize,
    rkyv::Archive,
    rkyv::Deserialize,
    rkyv::Serialize,
)]
#[rkyv(derive(Debug))]
pub struct DNSPacket {
    pub header: DNSHeader,
    pub questions: Vec<DNSQuestion>,
    pub answers: Vec<DNSResource>,
    pub authorities: Vec<DNSResource>,
    pub resources: Vec<DNSResource>,
}

impl DNSPacket {
    /// Parse a complete DNS message from wire format, following compression
    /// pointers against the full buffer.
    pub fn parse(buf: &[u8]) -> Result<Self, ParseError> {
        if buf.len() < 12 {
            return Err(ParseError::InvalidHeader);
        }

        let mut header_reader = BitReader::<_, BigEndian>::new(&buf[0..12]);
        let mut header = DNSHeader::default();
        header.read(&mut header_reader)?;

        // Body sections start after the fixed 12-byte header; reading with
        // the full buffer lets compression pointers resolve anywhere in it.
        let mut reader = BitReader::<_, BigEndian>::new(&buf[12..]);

        let mut questions = Vec::with_capacity(header.qdcount as usize);
        for _ in 0..header.qdcount {
            let mut question = DNSQuestion::default();
            question.read_with_buffer(&mut reader, buf)?;
            questions.push(question);
        }

        let mut answers = Vec::with_capacity(header.ancount as usize);
        for _ in 0..header.ancount {
            let mut answer = DNSResource::default();
            answer.read_with_buffer(&mut reader, buf)?;
            answers.push(answer);
        }

        let mut authorities = Vec::with_capacity(header.nscount as usize);
        for _ in 0..header.nscount {
            let mut authority = DNSResource::default();
            authority.read_with_buffer(&mut reader, buf)?;
            authorities.push(authority);
        }

        let mut resources = Vec::with_capacity(header.arcount as usize);
        for _ in 0..header.arcount {
            let mut resource = DNSResource::default();
            resource.read_with_buffer(&mut reader, buf)?;
            resources.push(resource);
        }

        Ok(Self {
            header,
            questions,
            answers,
            authorities,
            resources,
        })
    }

    /// Serialize back to wire format, recomputing the section counts from
    /// the vectors so callers don't have to keep them in sync by hand.
    pub fn serialize(&self) -> Result<Vec<u8>, ParseError> {
        let mut header = self.header.clone();
        header.qdcount = self.questions.len() as u16;
        header.ancount = self.answers.len() as u16;
        header.nscount = self.authorities.len() as u16;
        header.arcount = self.resources.len() as u16;

        let mut buf = Vec::new();
        let mut writer = BitWriter::<_, BigEndian>::new(&mut buf);
        header.write(&mut writer)?;
        for question in &self.questions {
            question.write(&mut writer)?;
        }
        for answer in &self.answers {
            answer.write(&mut writer)?;
        }
        for authority in &self.authorities {
            authority.write(&mut writer)?;
        }
        for resource in &self.resources {
            resource.write(&mut writer)?;
        }
        writer.byte_align()?;
        Ok(buf)
    }

    /// Serialize into a caller-owned buffer, clearing it first. Saves an
    /// allocation over [`Self::serialize`] on hot paths that already have a
    /// pooled buffer handy.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) -> Result<(), ParseError> {
        buf.clear();
        buf.extend_from_slice(&self.serialize()?);
        Ok(())
    }

    /// EDNS0 UDP payload size advertised via an OPT record in the additional
    /// section, falling back to the traditional 512-byte UDP limit.
    pub fn max_udp_payload_size(&self) -> usize {
        self.resources
            .iter()
            .find(|r| r.rtype == super::enums::DNSResourceType::OPT)
            .map(|opt| opt.raw_class.unwrap_or(512).max(512) as usize)
            .unwrap_or(512)
    }

    /// Find the client's EDNS COOKIE option, if an OPT record carries one.
    pub fn get_client_cookie(&self) -> Option<Vec<u8>> {
        let opt = self
            .resources
            .iter()
            .find(|r| r.rtype == super::enums::DNSResourceType::OPT)?;
        let edns = super::edns::EdnsOpt::parse_from_resource(
            opt.raw_class.unwrap_or(0),
            opt.ttl,
            &opt.rdata,
        )
        .ok()?;
        edns.find_option(super::edns::EdnsOptionCode::Cookie.into())
            .map(|option| option.data.clone())
    }
}
