//! RESP wire codec
//!
//! Encoder and reply parser for the broker's wire protocol (RESP2).
//! Commands go out as arrays of bulk strings; replies come back as simple
//! strings, errors, integers, bulk strings or nested arrays. Null bulks
//! and null arrays both parse to [`RespValue::Null`], which is also what a
//! blocking read returns on timeout.

use std::future::Future;
use std::io;
use std::pin::Pin;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// One parsed reply value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Vec<u8>),
    Null,
    Array(Vec<RespValue>),
}

impl RespValue {
    /// Bulk or simple-string content as UTF-8 text.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::Simple(s) => Some(s.clone()),
            Self::Bulk(bytes) => String::from_utf8(bytes.clone()).ok(),
            _ => None,
        }
    }
}

/// Encode a command as an array of bulk strings.
pub fn encode_command(args: &[&str]) -> Vec<u8> {
    let mut out = Vec::with_capacity(16 + args.iter().map(|a| a.len() + 16).sum::<usize>());
    out.extend_from_slice(format!("*{}\r\n", args.len()).as_bytes());
    for arg in args {
        out.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
        out.extend_from_slice(arg.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out
}

/// Read one complete reply value.
pub fn read_value<'a, R>(
    reader: &'a mut R,
) -> Pin<Box<dyn Future<Output = io::Result<RespValue>> + Send + 'a>>
where
    R: AsyncBufRead + Unpin + Send,
{
    Box::pin(async move {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed",
            ));
        }
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            return Err(protocol_error("empty reply line"));
        }

        let (kind, rest) = line.split_at(1);
        match kind {
            "+" => Ok(RespValue::Simple(rest.to_string())),
            "-" => Ok(RespValue::Error(rest.to_string())),
            ":" => rest
                .parse()
                .map(RespValue::Integer)
                .map_err(|_| protocol_error("invalid integer reply")),
            "$" => {
                let len: i64 = rest
                    .parse()
                    .map_err(|_| protocol_error("invalid bulk length"))?;
                if len < 0 {
                    return Ok(RespValue::Null);
                }
                let mut body = vec![0u8; len as usize + 2];
                reader.read_exact(&mut body).await?;
                body.truncate(len as usize);
                Ok(RespValue::Bulk(body))
            }
            "*" => {
                let len: i64 = rest
                    .parse()
                    .map_err(|_| protocol_error("invalid array length"))?;
                if len < 0 {
                    return Ok(RespValue::Null);
                }
                let mut items = Vec::with_capacity(len as usize);
                for _ in 0..len {
                    items.push(read_value(reader).await?);
                }
                Ok(RespValue::Array(items))
            }
            other => Err(protocol_error(&format!("unknown reply type {other:?}"))),
        }
    })
}

fn protocol_error(message: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.to_string())
}
