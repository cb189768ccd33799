use log::debug;
use ssh2::{Session, Sftp};
use std::error::Error as StdError;
use std::fmt;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::{Path, PathBuf};

use crate::blob::{locator_for, validate_blob_name, BlobStore};
use crate::error::DispatchError;

/// SFTP-specific errors
#[derive(Debug)]
pub enum SftpError {
    /// Failed to establish TCP connection
    ConnectionFailed(String),
    /// SSH authentication failed
    AuthenticationFailed(String),
    /// Remote file operation failed
    RemoteFileError(PathBuf, String),
    /// Directory creation failed
    DirectoryError(PathBuf, String),
    /// File size mismatch after upload
    SizeMismatch { expected: u64, actual: u64 },
    /// General I/O error
    IoError(std::io::Error),
    /// SSH2 library error
    Ssh2Error(ssh2::Error),
}

impl fmt::Display for SftpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SftpError::ConnectionFailed(msg) => write!(f, "Connection failed: {}", msg),
            SftpError::AuthenticationFailed(msg) => write!(f, "Authentication failed: {}", msg),
            SftpError::RemoteFileError(path, msg) => {
                write!(f, "Remote file error '{}': {}", path.display(), msg)
            }
            SftpError::DirectoryError(path, msg) => {
                write!(f, "Directory error '{}': {}", path.display(), msg)
            }
            SftpError::SizeMismatch { expected, actual } => {
                write!(
                    f,
                    "Size mismatch: expected {} bytes, got {} bytes",
                    expected, actual
                )
            }
            SftpError::IoError(err) => write!(f, "I/O error: {}", err),
            SftpError::Ssh2Error(err) => write!(f, "SSH2 error: {}", err),
        }
    }
}

impl StdError for SftpError {}

impl From<std::io::Error> for SftpError {
    fn from(err: std::io::Error) -> Self {
        SftpError::IoError(err)
    }
}

impl From<ssh2::Error> for SftpError {
    fn from(err: ssh2::Error) -> Self {
        SftpError::Ssh2Error(err)
    }
}

impl From<SftpError> for DispatchError {
    fn from(err: SftpError) -> Self {
        DispatchError::external("sftp", err)
    }
}

pub type Result<T> = std::result::Result<T, SftpError>;

/// Configuration for SFTP connection
#[derive(Debug, Clone)]
pub struct SftpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl SftpConfig {
    pub fn with_password(host: String, port: u16, username: String, password: String) -> Self {
        Self {
            host,
            port,
            username,
            password,
        }
    }

    /// Create an SFTP configuration from the [sftp] config section,
    /// resolving the password from the credentials file
    pub fn from_storage_config(
        config: &crate::config::SftpStorageConfig,
        credentials: &Option<crate::credentials::Credentials>,
    ) -> crate::error::Result<Self> {
        let password = crate::credentials::get_sftp_password(credentials, &config.credential_profile)?;

        Ok(Self::with_password(
            config.host.clone(),
            config.port,
            config.username.clone(),
            password,
        ))
    }
}

/// Options for file upload
#[derive(Debug, Clone)]
pub struct UploadOptions {
    /// Buffer size for reading/writing (default: 64KB)
    pub buffer_size: usize,
    /// Upload to a temp name, then rename
    pub atomic: bool,
    /// Verify file size after upload
    pub verify_size: bool,
    /// File permissions in octal (e.g., 0o644)
    pub permissions: i32,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            buffer_size: 64 * 1024,
            atomic: true,
            verify_size: true,
            permissions: 0o644,
        }
    }
}

/// SFTP client for file operations
pub struct SftpClient {
    // Keeps the SSH connection alive for `sftp`
    _session: Session,
    sftp: Sftp,
}

impl SftpClient {
    /// Connect to SFTP server with the given configuration
    pub fn connect(config: &SftpConfig) -> Result<Self> {
        let addr = format!("{}:{}", config.host, config.port);

        let tcp = TcpStream::connect(&addr).map_err(|e| {
            SftpError::ConnectionFailed(format!("Failed to connect to {}: {}", addr, e))
        })?;

        let mut session = Session::new()?;
        session.set_tcp_stream(tcp);
        session.handshake()?;

        session
            .userauth_password(&config.username, &config.password)
            .map_err(|e| {
                SftpError::AuthenticationFailed(format!(
                    "Password authentication failed for user '{}': {}",
                    config.username, e
                ))
            })?;

        if !session.authenticated() {
            return Err(SftpError::AuthenticationFailed(
                "Authentication failed (session not authenticated)".to_string(),
            ));
        }

        let sftp = session.sftp()?;

        Ok(Self {
            _session: session,
            sftp,
        })
    }

    /// Create a directory recursively, similar to `mkdir -p`
    pub fn mkdir_p(&self, path: &Path, permissions: i32) -> Result<()> {
        let mut current = PathBuf::new();

        for component in path.components() {
            current.push(component);

            if self.sftp.mkdir(&current, permissions).is_err() {
                match self.sftp.stat(&current) {
                    Ok(stat) if stat.is_dir() => {}
                    Ok(_) => {
                        return Err(SftpError::DirectoryError(
                            current.clone(),
                            "Path exists but is not a directory".to_string(),
                        ));
                    }
                    Err(e) => {
                        return Err(SftpError::DirectoryError(
                            current.clone(),
                            format!("Failed to create directory: {}", e),
                        ));
                    }
                }
            }
        }

        Ok(())
    }

    /// Upload data from a reader to `remote_path`, creating parent
    /// directories. With `atomic`, a `.tmpupload` file is renamed into place.
    pub fn upload_stream<R: Read>(
        &self,
        reader: &mut R,
        remote_path: &Path,
        size: u64,
        options: &UploadOptions,
    ) -> Result<()> {
        let (actual_remote_path, is_temp) = if options.atomic {
            let temp_path = PathBuf::from(format!("{}.tmpupload", remote_path.display()));
            (temp_path, true)
        } else {
            (remote_path.to_path_buf(), false)
        };

        if let Some(parent) = actual_remote_path.parent() {
            if !parent.as_os_str().is_empty() {
                self.mkdir_p(parent, 0o755)?;
            }
        }

        let mut remote_file = self
            .sftp
            .open_mode(
                &actual_remote_path,
                ssh2::OpenFlags::WRITE | ssh2::OpenFlags::CREATE | ssh2::OpenFlags::TRUNCATE,
                options.permissions,
                ssh2::OpenType::File,
            )
            .map_err(|e| {
                SftpError::RemoteFileError(
                    actual_remote_path.clone(),
                    format!("Failed to create remote file: {}", e),
                )
            })?;

        let mut buffer = vec![0u8; options.buffer_size];
        loop {
            let n = reader.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            remote_file.write_all(&buffer[..n]).map_err(|e| {
                SftpError::RemoteFileError(
                    actual_remote_path.clone(),
                    format!("Failed to write to remote file: {}", e),
                )
            })?;
        }

        remote_file.flush().map_err(|e| {
            SftpError::RemoteFileError(
                actual_remote_path.clone(),
                format!("Failed to flush remote file: {}", e),
            )
        })?;
        drop(remote_file);

        if options.verify_size {
            let stat = self.sftp.stat(&actual_remote_path).map_err(|e| {
                SftpError::RemoteFileError(
                    actual_remote_path.clone(),
                    format!("Failed to stat remote file after upload: {}", e),
                )
            })?;

            let remote_size = stat.size.unwrap_or(0);
            if remote_size != size {
                if is_temp {
                    let _ = self.sftp.unlink(&actual_remote_path);
                }
                return Err(SftpError::SizeMismatch {
                    expected: size,
                    actual: remote_size,
                });
            }
        }

        if is_temp {
            self.sftp
                .rename(&actual_remote_path, remote_path, None)
                .map_err(|e| {
                    SftpError::RemoteFileError(
                        remote_path.to_path_buf(),
                        format!("Failed to rename temp file to final path: {}", e),
                    )
                })?;
        }

        Ok(())
    }
}

/// Blobs uploaded below a remote directory over SFTP
pub struct SftpBlobStore {
    client: SftpClient,
    remote_dir: PathBuf,
    base_url: String,
    options: UploadOptions,
}

impl SftpBlobStore {
    pub fn connect(
        config: &SftpConfig,
        remote_dir: impl Into<PathBuf>,
        base_url: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            client: SftpClient::connect(config)?,
            remote_dir: remote_dir.into(),
            base_url: base_url.into(),
            options: UploadOptions::default(),
        })
    }
}

impl BlobStore for SftpBlobStore {
    fn put(&self, name: &str, bytes: &[u8]) -> crate::error::Result<String> {
        validate_blob_name(name)?;
        let remote_path = self.remote_dir.join(name);
        let mut reader = bytes;
        self.client
            .upload_stream(&mut reader, &remote_path, bytes.len() as u64, &self.options)?;
        debug!("Uploaded {} bytes to {}", bytes.len(), remote_path.display());
        Ok(locator_for(&self.base_url, name))
    }
}
