//! Protocol message encoding

use super::constants::SSL_REQUEST_CODE;
use super::message::FrontendMessage;
use bytes::{BufMut, BytesMut};
use std::io;

/// Encode a frontend message into bytes
pub fn encode_message(msg: &FrontendMessage) -> io::Result<BytesMut> {
    let mut buf = BytesMut::new();

    match msg {
        FrontendMessage::Startup { version, params } => {
            framed(&mut buf, None, |buf| {
                buf.put_i32(*version);
                for (key, value) in params {
                    put_cstr(buf, key)?;
                    put_cstr(buf, value)?;
                }
                buf.put_u8(0);
                Ok(())
            })?;
        }
        FrontendMessage::SslRequest => {
            buf.put_i32(8);
            buf.put_i32(SSL_REQUEST_CODE);
        }
        FrontendMessage::Password(password) => {
            framed(&mut buf, Some(b'p'), |buf| put_cstr(buf, password))?;
        }
        FrontendMessage::SaslInitialResponse { mechanism, data } => {
            framed(&mut buf, Some(b'p'), |buf| {
                put_cstr(buf, mechanism)?;
                buf.put_i32(len_i32(data.len())?);
                buf.put_slice(data);
                Ok(())
            })?;
        }
        FrontendMessage::SaslResponse { data } => {
            framed(&mut buf, Some(b'p'), |buf| {
                buf.put_slice(data);
                Ok(())
            })?;
        }
        FrontendMessage::Query(query) => {
            framed(&mut buf, Some(b'Q'), |buf| put_cstr(buf, query))?;
        }
        FrontendMessage::Parse { query } => {
            framed(&mut buf, Some(b'P'), |buf| {
                put_cstr(buf, "")?; // unnamed statement
                put_cstr(buf, query)?;
                buf.put_i16(0); // let the server infer parameter types
                Ok(())
            })?;
        }
        FrontendMessage::Bind { params } => {
            framed(&mut buf, Some(b'B'), |buf| {
                put_cstr(buf, "")?; // unnamed portal
                put_cstr(buf, "")?; // unnamed statement
                buf.put_i16(0); // all parameters in text format
                buf.put_i16(len_i16(params.len())?);
                for param in params {
                    match param {
                        Some(value) => {
                            buf.put_i32(len_i32(value.len())?);
                            buf.put_slice(value.as_bytes());
                        }
                        None => buf.put_i32(-1),
                    }
                }
                buf.put_i16(0); // all results in text format
                Ok(())
            })?;
        }
        FrontendMessage::DescribePortal => {
            framed(&mut buf, Some(b'D'), |buf| {
                buf.put_u8(b'P');
                put_cstr(buf, "")
            })?;
        }
        FrontendMessage::Execute => {
            framed(&mut buf, Some(b'E'), |buf| {
                put_cstr(buf, "")?;
                buf.put_i32(0); // no row limit
                Ok(())
            })?;
        }
        FrontendMessage::Sync => {
            buf.put_u8(b'S');
            buf.put_i32(4);
        }
        FrontendMessage::Terminate => {
            buf.put_u8(b'X');
            buf.put_i32(4);
        }
    }

    Ok(buf)
}

/// Write an optional tag, a length placeholder, the body, then patch the length.
fn framed<F>(buf: &mut BytesMut, tag: Option<u8>, body: F) -> io::Result<()>
where
    F: FnOnce(&mut BytesMut) -> io::Result<()>,
{
    if let Some(tag) = tag {
        buf.put_u8(tag);
    }
    let len_pos = buf.len();
    buf.put_i32(0);
    body(buf)?;
    let len = len_i32(buf.len() - len_pos)?;
    buf[len_pos..len_pos + 4].copy_from_slice(&len.to_be_bytes());
    Ok(())
}

fn put_cstr(buf: &mut BytesMut, s: &str) -> io::Result<()> {
    if s.as_bytes().contains(&0) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "string contains an interior NUL byte",
        ));
    }
    buf.put_slice(s.as_bytes());
    buf.put_u8(0);
    Ok(())
}

fn len_i32(len: usize) -> io::Result<i32> {
    i32::try_from(len)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "message too large"))
}

fn len_i16(len: usize) -> io::Result<i16> {
    i16::try_from(len)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "too many parameters"))
}
