// Copyright (c) Contributors to the pinenv project.
// SPDX-License-Identifier: Apache-2.0

//! Package store validation.
//!
//! Before a session is materialized every artifact path can be checked
//! against the store that owns it. [`FilesystemStore`] only checks that the
//! path exists; [`DaemonStore`] asks a store daemon over its worker protocol,
//! either on a unix socket or through `nix-daemon --stdio` for a given store
//! URI.

use std::fmt;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::{Arc, Mutex};

use crate::{Error, Settings};

#[cfg(test)]
#[path = "./store_test.rs"]
mod store_test;

/// Variable overriding the socket of the local store daemon.
pub const DAEMON_SOCKET_VAR: &str = "NIX_DAEMON_SOCKET_PATH";

/// Socket of the local store daemon when [`DAEMON_SOCKET_VAR`] is unset.
pub const DEFAULT_DAEMON_SOCKET: &str = "/nix/var/nix/daemon-socket/socket";

/// Setting value selecting the local daemon socket.
pub const LOCAL_DAEMON: &str = "daemon";

/// Setting value selecting the plain filesystem check.
pub const LOCAL_FILESYSTEM: &str = "local";

pub const WORKER_MAGIC_1: u64 = 0x6e697863;
pub const WORKER_MAGIC_2: u64 = 0x6478696f;

/// Protocol version spoken by this client, `1.34`.
pub const PROTOCOL_VERSION: u64 = (1 << 8) | 34;

/// Oldest daemon protocol version accepted, `1.14`.
pub const MINIMUM_PROTOCOL_VERSION: u64 = (1 << 8) | 14;

const STDERR_NEXT: u64 = 0x6f6c6d67;
const STDERR_READ: u64 = 0x64617461;
const STDERR_WRITE: u64 = 0x64617416;
const STDERR_LAST: u64 = 0x616c7473;
const STDERR_ERROR: u64 = 0x63787470;
const STDERR_START_ACTIVITY: u64 = 0x53545254;
const STDERR_STOP_ACTIVITY: u64 = 0x53544f50;
const STDERR_RESULT: u64 = 0x52534c54;

const OP_IS_VALID_PATH: u64 = 1;

/// Longest string accepted from a daemon.
const MAX_STRING_LEN: u64 = 64 * 1024 * 1024;

fn major(version: u64) -> u64 {
    version & 0xff00
}

fn minor(version: u64) -> u64 {
    version & 0x00ff
}

fn version_string(version: u64) -> String {
    format!("{}.{}", major(version) >> 8, minor(version))
}

/// Answers whether a path is present and valid in a package store.
pub trait StoreValidator: fmt::Debug + Send + Sync {
    fn is_valid_path(&self, path: &Path) -> crate::Result<bool>;
}

/// Treats every existing path as valid.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilesystemStore;

impl StoreValidator for FilesystemStore {
    fn is_valid_path(&self, path: &Path) -> crate::Result<bool> {
        Ok(path.exists())
    }
}

/// Build the validator selected by `settings.store`.
///
/// No setting means no store check beyond what the materializer already
/// does on disk. `local` checks that artifact paths exist, `daemon` talks
/// to the local store daemon and any other value is a store URI served by
/// `nix-daemon --stdio`.
pub fn from_settings(settings: &Settings) -> crate::Result<Option<Arc<dyn StoreValidator>>> {
    let Some(store) = settings.store.as_deref() else {
        return Ok(None);
    };
    let validator: Arc<dyn StoreValidator> = match store {
        LOCAL_FILESYSTEM => Arc::new(FilesystemStore),
        #[cfg(unix)]
        LOCAL_DAEMON => Arc::new(DaemonStore::connect_local()?),
        uri => Arc::new(DaemonStore::connect_to_store(uri)?),
    };
    Ok(Some(validator))
}

/// One client connection speaking the store worker protocol.
pub struct DaemonConnection<T> {
    stream: T,
    daemon_version: u64,
    daemon_nix_version: Option<String>,
}

impl<T> fmt::Debug for DaemonConnection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DaemonConnection")
            .field("daemon_version", &self.daemon_version)
            .field("daemon_nix_version", &self.daemon_nix_version)
            .finish_non_exhaustive()
    }
}

impl<T: Read + Write> DaemonConnection<T> {
    /// Exchange magic numbers and versions with the daemon on `stream`.
    pub fn handshake(mut stream: T) -> crate::Result<Self> {
        write_u64(&mut stream, WORKER_MAGIC_1)?;
        stream.flush()?;

        let magic = read_u64(&mut stream)?;
        if magic != WORKER_MAGIC_2 {
            return Err(Error::protocol(format!(
                "unexpected magic number {magic:#x} from daemon"
            )));
        }

        let daemon_version = read_u64(&mut stream)?;
        if major(daemon_version) != major(PROTOCOL_VERSION)
            || daemon_version < MINIMUM_PROTOCOL_VERSION
        {
            return Err(Error::protocol(format!(
                "unsupported daemon protocol version {}",
                version_string(daemon_version)
            )));
        }
        let version = daemon_version.min(PROTOCOL_VERSION);

        write_u64(&mut stream, PROTOCOL_VERSION)?;
        // obsolete CPU affinity and reserve-space fields
        write_u64(&mut stream, 0)?;
        write_u64(&mut stream, 0)?;
        stream.flush()?;

        let daemon_nix_version = if minor(version) >= 33 {
            Some(read_string(&mut stream)?)
        } else {
            None
        };

        let mut connection = Self {
            stream,
            daemon_version: version,
            daemon_nix_version,
        };
        connection.process_stderr()?;
        tracing::debug!(
            version = %version_string(version),
            nix = connection.daemon_nix_version.as_deref().unwrap_or("unknown"),
            "connected to store daemon"
        );
        Ok(connection)
    }

    /// Negotiated protocol version.
    pub fn daemon_version(&self) -> u64 {
        self.daemon_version
    }

    /// Version string the daemon reported, for protocol 1.33 and later.
    pub fn daemon_nix_version(&self) -> Option<&str> {
        self.daemon_nix_version.as_deref()
    }

    pub fn is_valid_path(&mut self, path: &Path) -> crate::Result<bool> {
        write_u64(&mut self.stream, OP_IS_VALID_PATH)?;
        write_bytes(&mut self.stream, path.as_os_str().as_encoded_bytes())?;
        self.stream.flush()?;
        self.process_stderr()?;
        Ok(read_u64(&mut self.stream)? != 0)
    }

    /// Consume log and activity messages until the daemon hands the
    /// connection back.
    fn process_stderr(&mut self) -> crate::Result<()> {
        loop {
            match read_u64(&mut self.stream)? {
                STDERR_LAST => return Ok(()),
                STDERR_NEXT => {
                    let line = read_string(&mut self.stream)?;
                    tracing::debug!(target: "pinenv::store::daemon", "{}", line.trim_end());
                }
                STDERR_WRITE => {
                    let data = read_string(&mut self.stream)?;
                    tracing::trace!(bytes = data.len(), "daemon output");
                }
                STDERR_START_ACTIVITY => {
                    let id = read_u64(&mut self.stream)?;
                    let level = read_u64(&mut self.stream)?;
                    let kind = read_u64(&mut self.stream)?;
                    let text = read_string(&mut self.stream)?;
                    let fields = read_fields(&mut self.stream)?;
                    let parent = read_u64(&mut self.stream)?;
                    tracing::trace!(id, level, kind, parent, ?fields, "{text}");
                }
                STDERR_STOP_ACTIVITY => {
                    let id = read_u64(&mut self.stream)?;
                    tracing::trace!(id, "activity stopped");
                }
                STDERR_RESULT => {
                    let id = read_u64(&mut self.stream)?;
                    let kind = read_u64(&mut self.stream)?;
                    let fields = read_fields(&mut self.stream)?;
                    tracing::trace!(id, kind, ?fields, "activity result");
                }
                STDERR_ERROR => return Err(self.read_error()),
                STDERR_READ => {
                    return Err(Error::protocol("daemon asked for input, which is never sent"));
                }
                other => {
                    return Err(Error::protocol(format!(
                        "unknown message {other:#x} from daemon"
                    )));
                }
            }
        }
    }

    fn read_error(&mut self) -> Error {
        let message = if minor(self.daemon_version) >= 26 {
            self.read_structured_error()
        } else {
            read_string(&mut self.stream).and_then(|message| {
                let status = read_u64(&mut self.stream)?;
                Ok(format!("{message} (status {status})"))
            })
        };
        match message {
            Ok(message) => Error::StoreDaemon { message },
            Err(err) => err,
        }
    }

    fn read_structured_error(&mut self) -> crate::Result<String> {
        let _kind = read_string(&mut self.stream)?;
        let _level = read_u64(&mut self.stream)?;
        let _name = read_string(&mut self.stream)?;
        let message = read_string(&mut self.stream)?;
        if read_u64(&mut self.stream)? != 0 {
            return Err(Error::protocol("error positions are not supported"));
        }
        let traces = read_u64(&mut self.stream)?;
        let mut lines = vec![message];
        for _ in 0..traces {
            if read_u64(&mut self.stream)? != 0 {
                return Err(Error::protocol("error positions are not supported"));
            }
            lines.push(read_string(&mut self.stream)?);
        }
        Ok(lines.join("\n"))
    }
}

/// A field attached to a daemon activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    Int(u64),
    String(String),
}

pub(crate) fn read_u64<R: Read>(reader: &mut R) -> crate::Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

pub(crate) fn write_u64<W: Write>(writer: &mut W, value: u64) -> crate::Result<()> {
    writer.write_all(&value.to_le_bytes())?;
    Ok(())
}

/// Number of zero bytes that follow a string of `len` bytes.
fn padding(len: u64) -> usize {
    ((8 - len % 8) % 8) as usize
}

pub(crate) fn write_bytes<W: Write>(writer: &mut W, bytes: &[u8]) -> crate::Result<()> {
    let len = bytes.len() as u64;
    write_u64(writer, len)?;
    writer.write_all(bytes)?;
    writer.write_all(&[0u8; 8][..padding(len)])?;
    Ok(())
}

pub(crate) fn read_string<R: Read>(reader: &mut R) -> crate::Result<String> {
    let len = read_u64(reader)?;
    if len > MAX_STRING_LEN {
        return Err(Error::protocol(format!("string of {len} bytes is too long")));
    }
    let mut bytes = vec![0u8; len as usize];
    reader.read_exact(&mut bytes)?;
    let mut pad = [0u8; 8];
    reader.read_exact(&mut pad[..padding(len)])?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn read_fields<R: Read>(reader: &mut R) -> crate::Result<Vec<Field>> {
    let count = read_u64(reader)?;
    let mut fields = Vec::new();
    for _ in 0..count {
        let field = match read_u64(reader)? {
            0 => Field::Int(read_u64(reader)?),
            1 => Field::String(read_string(reader)?),
            other => {
                return Err(Error::protocol(format!("unknown field type {other}")));
            }
        };
        fields.push(field);
    }
    Ok(fields)
}

/// A duplex byte stream to a daemon.
pub trait Transport: Read + Write + Send {}

impl<T: Read + Write + Send> Transport for T {}

/// `nix-daemon --stdio` running as a child process.
struct ChildTransport {
    child: Child,
    stdin: ChildStdin,
    stdout: ChildStdout,
}

impl Read for ChildTransport {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.stdout.read(buf)
    }
}

impl Write for ChildTransport {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.stdin.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.stdin.flush()
    }
}

impl Drop for ChildTransport {
    fn drop(&mut self) {
        if let Err(err) = self.child.kill() {
            tracing::debug!(%err, "store daemon already exited");
        }
        let _ = self.child.wait();
    }
}

/// A [`StoreValidator`] backed by a store daemon connection.
///
/// Requests are serialized over the single connection.
pub struct DaemonStore {
    address: String,
    connection: Mutex<DaemonConnection<Box<dyn Transport>>>,
}

impl fmt::Debug for DaemonStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DaemonStore")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl DaemonStore {
    /// Handshake with a daemon on an already open stream.
    pub fn new<A, T>(address: A, stream: T) -> crate::Result<Self>
    where
        A: Into<String>,
        T: Transport + 'static,
    {
        let stream: Box<dyn Transport> = Box::new(stream);
        Ok(Self {
            address: address.into(),
            connection: Mutex::new(DaemonConnection::handshake(stream)?),
        })
    }

    /// Connect to the local daemon, honoring [`DAEMON_SOCKET_VAR`].
    #[cfg(unix)]
    pub fn connect_local() -> crate::Result<Self> {
        let socket = std::env::var_os(DAEMON_SOCKET_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DAEMON_SOCKET));
        Self::connect_socket(&socket)
    }

    #[cfg(unix)]
    pub fn connect_socket(socket: &Path) -> crate::Result<Self> {
        let address = socket.display().to_string();
        let stream = std::os::unix::net::UnixStream::connect(socket).map_err(|error| {
            Error::StoreUnavailable {
                store: address.clone(),
                error,
            }
        })?;
        Self::new(address, stream)
    }

    /// Serve the store at `uri` with a `nix-daemon --stdio` child process.
    pub fn connect_to_store(uri: &str) -> crate::Result<Self> {
        let unavailable = |error| Error::StoreUnavailable {
            store: uri.to_string(),
            error,
        };
        let mut child = Command::new("nix-daemon")
            .args(["--store", uri, "--stdio"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(unavailable)?;
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            return Err(unavailable(std::io::Error::other("daemon pipes were not opened")));
        };
        Self::new(
            uri,
            ChildTransport {
                child,
                stdin,
                stdout,
            },
        )
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

impl StoreValidator for DaemonStore {
    fn is_valid_path(&self, path: &Path) -> crate::Result<bool> {
        let mut connection = self
            .connection
            .lock()
            .map_err(|_| Error::protocol("connection was left mid-request by a failed caller"))?;
        connection.is_valid_path(path)
    }
}
