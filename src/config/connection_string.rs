//! Connection URL parsing
//!
//! Supports formats:
//! * postgres://[user[:password]@][host][:port][/database][?params]
//! * postgres:///database?host=/path/to/socket/dir (Unix socket)
//! * postgres://user@[::1]:5432/database (IPv6 host)
//!
//! Recognised parameters: `host`, `port`, `dbname`, `user`, `password`,
//! `sslmode`, `sslrootcert`, `sslcert`, `sslkey`, `connect_timeout`.

use super::{SessionConfig, TlsOptions};
use crate::{Error, Result};
use std::path::PathBuf;
use std::time::Duration;

impl SessionConfig {
    /// Parse a `postgres://` or `postgresql://` URL.
    ///
    /// Fields the URL leaves out keep their defaults. Any `ssl*` parameter
    /// creates the TLS option bag.
    pub fn from_url(url: &str) -> Result<Self> {
        let rest = url
            .strip_prefix("postgres://")
            .or_else(|| url.strip_prefix("postgresql://"))
            .ok_or_else(|| {
                Error::Config("connection URL must start with postgres:// or postgresql://".into())
            })?;

        let mut config = SessionConfig::default();

        // Split off query string before parsing authority and path
        let (rest, query_string) = match rest.split_once('?') {
            Some((r, q)) => (r, q),
            None => (rest, ""),
        };

        let (authority, path) = match rest.split_once('/') {
            Some((a, p)) => (a, p),
            None => (rest, ""),
        };

        // userinfo ends at the last '@' so passwords may contain one
        let host_port = match authority.rsplit_once('@') {
            Some((userinfo, host_port)) => {
                match userinfo.split_once(':') {
                    Some((user, password)) => {
                        config.user = percent_decode(user)?;
                        config.password = Some(percent_decode(password)?);
                    }
                    None => config.user = percent_decode(userinfo)?,
                }
                host_port
            }
            None => authority,
        };

        if !host_port.is_empty() {
            let (host, port) = split_host_port(host_port)?;
            if !host.is_empty() {
                config.host = percent_decode(host)?;
            }
            if let Some(port) = port {
                config.port = parse_port(port)?;
            }
        }

        if !path.is_empty() {
            config.database = Some(percent_decode(path)?);
        }

        let mut tls: Option<TlsOptions> = None;
        for pair in query_string.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| Error::Config(format!("missing value for parameter '{}'", pair)))?;
            let value = percent_decode(value)?;

            match key {
                // a path means a socket directory, anything else a host name
                "host" if value.starts_with('/') => config.socket = Some(PathBuf::from(value)),
                "host" => config.host = value,
                "port" => config.port = parse_port(&value)?,
                "dbname" => config.database = Some(value),
                "user" => config.user = value,
                "password" => config.password = Some(value),
                "sslmode" => tls.get_or_insert_with(TlsOptions::default).ssl_mode = Some(value.parse()?),
                "sslrootcert" => tls.get_or_insert_with(TlsOptions::default).ssl_ca = Some(value.into()),
                "sslcert" => tls.get_or_insert_with(TlsOptions::default).ssl_cert = Some(value.into()),
                "sslkey" => tls.get_or_insert_with(TlsOptions::default).ssl_key = Some(value.into()),
                "connect_timeout" => {
                    let secs: u64 = value.parse().map_err(|_| {
                        Error::Config(format!("invalid connect_timeout '{}'", value))
                    })?;
                    config.connect_timeout = Duration::from_secs(secs);
                }
                other => {
                    return Err(Error::Config(format!(
                        "unsupported connection parameter '{}'",
                        other
                    )))
                }
            }
        }
        config.tls = tls;

        Ok(config)
    }
}

/// Split `host[:port]`, accepting a bracketed IPv6 literal
fn split_host_port(s: &str) -> Result<(&str, Option<&str>)> {
    if let Some(rest) = s.strip_prefix('[') {
        let (host, after) = rest
            .split_once(']')
            .ok_or_else(|| Error::Config(format!("unterminated IPv6 address in '{}'", s)))?;
        return match after {
            "" => Ok((host, None)),
            _ => after
                .strip_prefix(':')
                .map(|port| (host, Some(port)))
                .ok_or_else(|| Error::Config(format!("invalid host '{}'", s))),
        };
    }
    Ok(match s.split_once(':') {
        Some((host, port)) => (host, Some(port)),
        None => (s, None),
    })
}

fn parse_port(s: &str) -> Result<u16> {
    s.parse::<u16>()
        .ok()
        .filter(|p| *p != 0)
        .ok_or_else(|| Error::Config(format!("invalid port '{}'", s)))
}

/// Decode `%XX` escapes
fn percent_decode(s: &str) -> Result<String> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes
                .get(i + 1..i + 3)
                .and_then(|h| std::str::from_utf8(h).ok())
                .and_then(|h| u8::from_str_radix(h, 16).ok())
                .ok_or_else(|| Error::Config(format!("invalid percent-encoding in '{}'", s)))?;
            out.push(hex);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).map_err(|_| Error::Config(format!("invalid UTF-8 in '{}'", s)))
}
