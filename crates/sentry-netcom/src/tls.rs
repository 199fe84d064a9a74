//! 服务端 TLS 上下文
//!
//! 证书链与私钥从 PEM 文件加载。`force_auth` 打开时，客户端必须出示由
//! `clients` 指定 CA 签发的证书，否则握手失败、连接被关闭。

use crate::{NetcomConfig, NetcomError};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// 读取 PEM 证书链
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, NetcomError> {
    let invalid = |reason: String| NetcomError::InvalidCertificate {
        path: path.display().to_string(),
        reason,
    };

    let file = File::open(path).map_err(|e| invalid(e.to_string()))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| invalid(e.to_string()))?;
    if certs.is_empty() {
        return Err(invalid("no certificates found".to_string()));
    }
    Ok(certs)
}

/// 读取 PEM 私钥（PKCS#1、PKCS#8 或 SEC1）
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, NetcomError> {
    let invalid = |reason: String| NetcomError::InvalidKey {
        path: path.display().to_string(),
        reason,
    };

    let file = File::open(path).map_err(|e| invalid(e.to_string()))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|e| invalid(e.to_string()))?
        .ok_or_else(|| invalid("no private key found".to_string()))
}

/// 构建服务端 TLS 配置
pub fn server_config(config: &NetcomConfig) -> Result<Arc<ServerConfig>, NetcomError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let certs = load_certs(&config.certfile)?;
    let key = load_private_key(&config.keyfile)?;

    let builder = ServerConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()?;

    let builder = if config.force_auth {
        let ca_path = config.clients.as_deref().ok_or_else(|| {
            NetcomError::ClientCaError("force_auth requires a client CA file".to_string())
        })?;

        let mut roots = RootCertStore::empty();
        for cert in load_certs(ca_path).map_err(|e| NetcomError::ClientCaError(e.to_string()))? {
            roots
                .add(cert)
                .map_err(|e| NetcomError::ClientCaError(e.to_string()))?;
        }
        let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider)
            .build()
            .map_err(|e| NetcomError::ClientCaError(e.to_string()))?;
        info!("Client certificates required, CA {}", ca_path.display());
        builder.with_client_cert_verifier(verifier)
    } else {
        builder.with_no_client_auth()
    };

    let tls = builder
        .with_single_cert(certs, key)
        .map_err(|e| match e {
            rustls::Error::InconsistentKeys(_) => NetcomError::KeyCertMismatch,
            other => NetcomError::SslError(other),
        })?;
    Ok(Arc::new(tls))
}
