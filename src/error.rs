use std::sync::Arc;
use thiserror::Error;

/// Unified error type for the resolver
#[derive(Debug, Clone, Error)]
pub enum HeimdallError {
    // IO errors
    #[error("IO error: {0}")]
    Io(String),
    #[error("IO error: {0}")]
    IoError(Arc<std::io::Error>),

    // Configuration errors
    #[error("Invalid bind address: {0}")]
    InvalidBindAddress(String),
    #[error("Invalid upstream server: {0}")]
    InvalidUpstreamServer(String),
    #[error("Invalid HTTP bind address: {0}")]
    InvalidHttpBindAddress(String),
    #[error("Invalid worker threads: {0}")]
    InvalidWorkerThreads(String),
    #[error("Invalid cache size: {0}")]
    InvalidCacheSize(String),
    #[error("Invalid timeout: {0}")]
    InvalidTimeout(String),
    #[error("Invalid rate limit: {0}")]
    InvalidRateLimit(String),
    #[error("Invalid pause schedule: {0}")]
    InvalidPauseSchedule(String),
    #[error("Configuration parse error: {0}")]
    ConfigParseError(String),

    // DNS parsing errors
    #[error("Invalid DNS header")]
    InvalidHeader,
    #[error("Invalid DNS label")]
    InvalidLabel,
    #[error("Invalid question section")]
    InvalidQuestionSection,
    #[error("Invalid answer section")]
    InvalidAnswerSection,
    #[error("Invalid authority section")]
    InvalidAuthoritySection,
    #[error("Invalid additional section")]
    InvalidAdditionalSection,
    #[error("Invalid bit stream: {0}")]
    InvalidBitStream(String),
    #[error("Parse error: {0}")]
    ParseError(String),

    // DNS operation errors
    #[error("Operation timed out")]
    Timeout,
    #[error("Cache error: {0}")]
    Cache(String),
    #[error("Redis error: {0}")]
    Redis(String),
    #[error("Distributed lock unavailable for {0}")]
    LockUnavailable(String),

    // Rate limiting errors
    #[error("Rate limit error: {0}")]
    RateLimit(String),
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),
    #[error("Too many concurrent requests")]
    TooManyRequests,

    // Server state errors
    #[error("Server is shutting down")]
    ServerShutdown,

    // Validation errors
    #[error("Validation error: {0}")]
    ValidationError(String),

    // Blocklist errors
    #[error("Blocklist source error: {0}")]
    BlocklistSource(String),
    #[error("Invalid regex pattern: {0}")]
    InvalidRegexPattern(String),

    // Zone errors
    #[error("Zone parse error: {0}")]
    ZoneParseError(String),
    #[error("Invalid record: {0}")]
    InvalidRecord(String),
    #[error("Zone missing required SOA record")]
    MissingSOA,
    #[error("Zone contains duplicate SOA records")]
    DuplicateSOA,
    #[error("Invalid domain name: {0}")]
    InvalidDomainName(String),
    #[error("Zone not found: {0}")]
    ZoneNotFound(String),
    #[error("Zone file exceeds maximum size")]
    ZoneFileTooLarge,
    #[error("Invalid TTL value: {0}")]
    InvalidTTL(String),
    #[error("Invalid resource record type: {0}")]
    InvalidRRType(String),
    #[error("Zone validation error: {0}")]
    ZoneValidationError(String),

    // TLS errors
    #[error("Failed to read certificate file: {0}")]
    CertificateRead(String),
    #[error("Failed to parse certificate: {0}")]
    CertificateParse(String),
    #[error("Failed to parse private key: {0}")]
    PrivateKeyParse(String),
    #[error("TLS configuration error: {0}")]
    TlsConfigError(String),
    #[error("No valid certificate found in file")]
    NoCertificate,
    #[error("No valid private key found in file")]
    NoPrivateKey,
}

impl From<std::io::Error> for HeimdallError {
    fn from(err: std::io::Error) -> Self {
        HeimdallError::IoError(Arc::new(err))
    }
}

pub type Result<T> = std::result::Result<T, HeimdallError>;

/// Conversion helpers from subsystem-local error types into the unified error
pub mod conversions {
    use super::*;

    pub fn from_parse_error(err: crate::dns::ParseError) -> HeimdallError {
        use crate::dns::ParseError;
        match err {
            ParseError::InvalidHeader => HeimdallError::InvalidHeader,
            ParseError::InvalidLabel => HeimdallError::InvalidLabel,
            ParseError::InvalidQuestionSection => HeimdallError::InvalidQuestionSection,
            ParseError::InvalidAnswerSection => HeimdallError::InvalidAnswerSection,
            ParseError::InvalidAuthoritySection => HeimdallError::InvalidAuthoritySection,
            ParseError::InvalidAdditionalSection => HeimdallError::InvalidAdditionalSection,
            ParseError::InvalidBitStream(s) => HeimdallError::InvalidBitStream(s),
        }
    }

    pub fn from_zone_error(err: crate::zone::errors::ZoneError) -> HeimdallError {
        use crate::zone::errors::ZoneError;
        match err {
            ZoneError::ParseError(s) => HeimdallError::ZoneParseError(s),
            ZoneError::InvalidRecord(s) => HeimdallError::InvalidRecord(s),
            ZoneError::MissingSOA => HeimdallError::MissingSOA,
            ZoneError::DuplicateSOA => HeimdallError::DuplicateSOA,
            ZoneError::InvalidDomainName(s) => HeimdallError::InvalidDomainName(s),
            ZoneError::ZoneNotFound(s) => HeimdallError::ZoneNotFound(s),
            ZoneError::IoError(s) => HeimdallError::Io(s),
            ZoneError::FileTooLarge => HeimdallError::ZoneFileTooLarge,
            ZoneError::InvalidTTL(s) => HeimdallError::InvalidTTL(s),
            ZoneError::InvalidRRType(s) => HeimdallError::InvalidRRType(s),
            ZoneError::ValidationError(s) => HeimdallError::ZoneValidationError(s),
        }
    }

    pub fn from_tls_error(err: crate::transport::tls::TlsError) -> HeimdallError {
        use crate::transport::tls::TlsError;
        match err {
            TlsError::CertificateRead(e) => HeimdallError::CertificateRead(e.to_string()),
            TlsError::CertificateParse(s) => HeimdallError::CertificateParse(s),
            TlsError::PrivateKeyParse(s) => HeimdallError::PrivateKeyParse(s),
            TlsError::ConfigError(e) => HeimdallError::TlsConfigError(e.to_string()),
            TlsError::NoCertificate => HeimdallError::NoCertificate,
            TlsError::NoPrivateKey => HeimdallError::NoPrivateKey,
        }
    }
}
