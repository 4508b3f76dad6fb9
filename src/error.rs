use thiserror::Error;

/// Błędy kanału danych. Rozróżniamy brak danych (sieć / plik / status)
/// od uszkodzonej treści, żeby UI mogło pokazać właściwy stan.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("nie można odczytać {resource}: {source}")]
    Io {
        resource: String,
        #[source]
        source: std::io::Error,
    },

    #[error("błąd sieci przy pobieraniu {resource}: {source}")]
    Network {
        resource: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{resource} zwrócił status HTTP {status}")]
    Status { resource: String, status: u16 },

    #[error("niepoprawny JSON w {resource}: {message}")]
    Parse { resource: String, message: String },
}

impl LoadError {
    pub fn parse(resource: impl Into<String>, err: impl std::fmt::Display) -> Self {
        LoadError::Parse { resource: resource.into(), message: err.to_string() }
    }

    /// Zasób niedostępny – (a) w taksonomii błędów
    pub fn is_unavailable(&self) -> bool {
        matches!(self, LoadError::Io { .. } | LoadError::Network { .. } | LoadError::Status { .. })
    }

    pub fn resource(&self) -> &str {
        match self {
            LoadError::Io { resource, .. }
            | LoadError::Network { resource, .. }
            | LoadError::Status { resource, .. }
            | LoadError::Parse { resource, .. } => resource,
        }
    }
}
