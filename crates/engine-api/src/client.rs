use std::{ffi::CString, os::unix::prelude::FileTypeExt};

use custody_core::{FamilySummary, FileId, Pid, RespawnPolicy};
use http_body_util::{BodyExt, Either, Empty, Full};
use hyper::body::{Buf, Bytes};
use hyper::{Method, Request, Uri};
use hyper_util::client::legacy::Client;
use hyperlocal::{UnixClientExt, UnixConnector};
use serde::{Serialize, de::DeserializeOwned};

use crate::{
    dto::{ExitStatus, RegisterFamily, Registered, Terminated, Unregistered, Version, WaitForExit},
    error::EngineClientError,
};

#[derive(Debug, Clone)]
pub struct EngineApiClient {
    socket: String,
    client: Client<UnixConnector, Either<Full<Bytes>, Empty<Bytes>>>,
}

impl EngineApiClient {
    pub fn new() -> Result<Self, EngineClientError> {
        Self::unix(super::DEFAULT_UDS.to_owned())
    }

    pub fn unix(socket: String) -> Result<Self, EngineClientError> {
        // Check if input exists and if it is a unix socket
        match std::fs::metadata(&socket) {
            Err(err) => {
                return match err.kind() {
                    std::io::ErrorKind::NotFound => Err(EngineClientError::SocketNotFound(socket)),
                    std::io::ErrorKind::PermissionDenied => {
                        Err(EngineClientError::NoReadPermission(socket))
                    }
                    _ => Err(EngineClientError::FailedToGetMetadata(socket)),
                };
            }
            Ok(metadata) => {
                if !metadata.file_type().is_socket() {
                    return Err(EngineClientError::NotASocket(socket));
                }
            }
        };

        // Metadata permissions don't reflect the effective user under sudo,
        // so ask the kernel directly.
        let cstring = CString::new(socket.as_str())?;
        let write_permission = unsafe { libc::access(cstring.as_ptr(), libc::W_OK) } == 0;
        if !write_permission {
            return Err(EngineClientError::NoWritePermission(socket));
        }

        Ok(Self {
            socket,
            client: Client::unix(),
        })
    }

    fn uri<T: AsRef<str>>(&self, path: T) -> Uri {
        hyperlocal::Uri::new(self.socket.clone(), path.as_ref()).into()
    }

    async fn request<B, T>(
        &self,
        method: Method,
        uri: Uri,
        body: Option<&B>,
    ) -> Result<T, EngineClientError>
    where
        B: Serialize,
        T: DeserializeOwned,
    {
        let builder = Request::builder().method(method).uri(uri);
        let req = match body {
            Some(body) => {
                let body_string = serde_json::to_string(body)
                    .map_err(|err| EngineClientError::SerializeError(err.to_string()))?;
                builder
                    .header("content-type", "application/json")
                    .body(Either::Left(Full::from(body_string)))?
            }
            None => builder.body(Either::Right(Empty::<Bytes>::new()))?,
        };

        let res = self.client.request(req).await?;
        let status = res.status();
        let body = res.collect().await?;

        if status.is_success() {
            serde_json::from_reader(body.aggregate().reader())
                .map_err(|err| EngineClientError::DeserializeError(err.to_string()))
        } else {
            let error = body.to_bytes();
            let message = std::str::from_utf8(&error)?;
            Err(EngineClientError::UnexpectedResponse {
                status: status.as_u16(),
                message: message.to_string(),
            })
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: String) -> Result<T, EngineClientError> {
        self.request::<(), T>(Method::GET, self.uri(path), None)
            .await
    }

    pub async fn version(&self) -> Result<String, EngineClientError> {
        let version: Version = self.get("/version".to_string()).await?;
        Ok(version.version)
    }

    pub async fn families(&self) -> Result<Vec<FamilySummary>, EngineClientError> {
        self.get("/families".to_string()).await
    }

    pub async fn register_family(
        &self,
        pid: Pid,
        origin: FileId,
        policy: RespawnPolicy,
    ) -> Result<Pid, EngineClientError> {
        let body = RegisterFamily {
            pid,
            origin,
            policy,
        };
        let registered: Registered = self
            .request(Method::POST, self.uri("/families"), Some(&body))
            .await?;
        Ok(registered.root)
    }

    pub async fn unregister_family(&self, pid: Pid) -> Result<bool, EngineClientError> {
        let unregistered: Unregistered = self
            .request::<(), _>(Method::DELETE, self.uri(format!("/families/{pid}")), None)
            .await?;
        Ok(unregistered.removed)
    }

    pub async fn terminate_family(&self, pid: Pid) -> Result<Vec<Pid>, EngineClientError> {
        let terminated: Terminated = self
            .request::<(), _>(
                Method::POST,
                self.uri(format!("/families/{pid}/terminate")),
                None,
            )
            .await?;
        Ok(terminated.pids)
    }

    pub async fn members(&self, pid: Pid) -> Result<Vec<Pid>, EngineClientError> {
        self.get(format!("/families/{pid}/members")).await
    }

    pub async fn files(&self, pid: Pid) -> Result<Vec<FileId>, EngineClientError> {
        self.get(format!("/families/{pid}/files")).await
    }

    /// Zero `timeout_ms` waits without limit.
    pub async fn wait_for_exit(
        &self,
        pid: Pid,
        timeout_ms: u64,
    ) -> Result<ExitStatus, EngineClientError> {
        self.request(
            Method::POST,
            self.uri(format!("/families/{pid}/wait")),
            Some(&WaitForExit { timeout_ms }),
        )
        .await
    }
}
