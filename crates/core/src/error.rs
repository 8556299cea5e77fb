use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("failed to read {path}: {source}", path = path.display())]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}", path = path.display())]
    FileWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to create directory {path}: {source}", path = path.display())]
    DirCreation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid file pattern: {0}")]
    Pattern(#[from] glob::PatternError),
    #[error("failed to serialize JSON: {0}")]
    Serialization(serde_json::Error),
    #[error("failed to deserialize JSON: {0}")]
    Deserialization(serde_json::Error),
    #[error("failed to deserialize YAML: {0}")]
    YamlDeserialization(serde_yaml::Error),

    #[error(transparent)]
    Ids(#[from] mockpt_ids::IdError),
    #[error(transparent)]
    Fhir(#[from] fhir::FhirError),
    #[error(transparent)]
    Ccda(#[from] ccda::CcdaError),

    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("request to {url} returned HTTP {status}")]
    HttpStatus { url: String, status: u16 },
    #[error("patient {0} not found on server")]
    PatientNotFound(String),

    #[error("failed to start generator: {0}")]
    GeneratorSpawn(std::io::Error),
    #[error("generator exited with {status} (see {log})", log = log.display())]
    GeneratorFailed { status: String, log: PathBuf },
    #[error("generator did not finish within {0}s and was stopped")]
    GeneratorTimeout(u64),
    #[error("generator produced no document in {}", .0.display())]
    NoGeneratorOutput(PathBuf),
    #[error("add-on module not found: {}", .0.display())]
    AddonModuleMissing(PathBuf),
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;
