//! `reqwest`-backed client for calling a remote drive's `/ferrite/drive/v1`
//! surface. Separates a connection-level transport from a per-call
//! request, adapted from message-oriented framing to HTTP request/response
//! framing.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use tokio::sync::mpsc;
use url::Url;

use crate::auth::TokenIssuer;
use crate::errors::{Result, TransportError};
use crate::framing::{Frame, FrameDecoder};

#[derive(Clone)]
pub struct DriveClient {
    http: reqwest::Client,
    base_url: Url,
    issuer: TokenIssuer,
    drive_id: String,
}

impl DriveClient {
    pub fn new(base_url: Url, issuer: TokenIssuer, drive_id: String) -> Result<Self> {
        let http = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;
        Ok(Self {
            http,
            base_url,
            issuer,
            drive_id,
        })
    }

    fn method_url(&self, method: &str) -> Result<Url> {
        self.base_url
            .join(&format!("ferrite/drive/v1/{method}"))
            .map_err(|e| TransportError::Framing(e.to_string()))
    }

    /// Calls a non-streaming method and returns its full response payload,
    /// buffering any interleaved `Data` blocks a streaming handler happened
    /// to emit.
    pub async fn call(&self, method: &str, params: &[(&str, &str)], body: Bytes) -> Result<Bytes> {
        let mut rx = self.call_raw(method, params, body).await?;
        let mut buf = BytesMut::new();
        while let Some(frame) = rx.recv().await {
            match frame? {
                Frame::KeepAlive => {}
                Frame::Data(block) => buf.extend_from_slice(&block),
                Frame::Error(message) => return Err(TransportError::Remote(message)),
                Frame::Eof(payload) => {
                    buf.extend_from_slice(&payload);
                    return Ok(buf.freeze());
                }
            }
        }
        Err(TransportError::ConnectionClosed)
    }

    /// Calls a streaming method, returning a channel of successive `Data`
    /// blocks as they arrive rather than buffering the whole body, so the
    /// caller can read keep-alive/terminator bytes incrementally.
    pub async fn call_streaming(
        &self,
        method: &str,
        params: &[(&str, &str)],
        body: Bytes,
    ) -> Result<mpsc::Receiver<Result<Bytes>>> {
        let mut frames = self.call_raw(method, params, body).await?;
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            while let Some(frame) = frames.recv().await {
                match frame {
                    Ok(Frame::KeepAlive) => {}
                    Ok(Frame::Data(block)) => {
                        if tx.send(Ok(block)).await.is_err() {
                            break;
                        }
                    }
                    Ok(Frame::Eof(_)) => break,
                    Ok(Frame::Error(message)) => {
                        let _ = tx.send(Err(TransportError::Remote(message))).await;
                        break;
                    }
                    Err(err) => {
                        let _ = tx.send(Err(err)).await;
                        break;
                    }
                }
            }
        });
        Ok(rx)
    }

    async fn call_raw(
        &self,
        method: &str,
        params: &[(&str, &str)],
        body: Bytes,
    ) -> Result<mpsc::Receiver<Result<Frame>>> {
        let url = self.method_url(method)?;
        let token = self.issuer.issue(&self.drive_id)?;
        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .header("x-ferrite-disk-id", self.drive_id.as_str())
            .query(params)
            .body(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(TransportError::Remote(format!(
                "http status {}",
                response.status()
            )));
        }

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            let mut decoder = FrameDecoder::new();
            let mut byte_stream = response.bytes_stream();
            while let Some(chunk) = byte_stream.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(err) => {
                        let _ = tx.send(Err(TransportError::from(err))).await;
                        return;
                    }
                };
                let frames = match decoder.feed(&chunk) {
                    Ok(frames) => frames,
                    Err(err) => {
                        let _ = tx.send(Err(err)).await;
                        return;
                    }
                };
                for frame in frames {
                    if tx.send(Ok(frame)).await.is_err() {
                        return;
                    }
                }
            }
        });
        Ok(rx)
    }
}
