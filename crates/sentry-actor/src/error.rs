//! actor 层错误类型定义

use thiserror::Error;

/// actor 层错误类型
#[derive(Error, Debug)]
pub enum ActorError {
    /// 执行线程创建失败
    #[error("Failed to spawn thread for actor '{name}': {source}")]
    ThreadError {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::ActorError;

    #[test]
    fn test_thread_error_display() {
        let err = ActorError::ThreadError {
            name: "chmgr".to_string(),
            source: std::io::Error::other("out of threads"),
        };
        assert_eq!(
            err.to_string(),
            "Failed to spawn thread for actor 'chmgr': out of threads"
        );
    }
}
