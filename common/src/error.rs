use thiserror::Error;

/// 服务层通用错误
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::AddrInUse, "port taken");
        let err: ServiceError = io_error.into();
        assert!(matches!(err, ServiceError::IoError(_)));
        assert!(err.to_string().contains("port taken"));
    }
}
