//! blocking address resolution that preserves the raw resolver failure code.
//!
//! `std` hides the `getaddrinfo` failure code behind an opaque io error, but
//! retry layers need to tell a transient resolver failure (`EAI_AGAIN`, or
//! `EAI_NONAME` while no dns server is reachable) from a permanent one. This
//! resolver keeps the code.

use std::{
    error,
    ffi::{CStr, CString},
    fmt, io, mem,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV6},
    ptr,
};

/// Failure of [lookup_host], carrying the raw `getaddrinfo` result code.
#[derive(Debug)]
pub struct ResolveError {
    code: Option<i32>,
    message: String,
}

impl ResolveError {
    /// Resolution failure not produced by `getaddrinfo` itself.
    pub fn other(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    /// Raw `getaddrinfo` result code, when the resolver produced one.
    pub fn code(&self) -> Option<i32> {
        self.code
    }

    /// True for failures that may go away by themselves. `EAI_AGAIN` is
    /// transient by definition; `EAI_NONAME` is formally permanent but also
    /// shows up when there is currently no network path to the dns server.
    pub fn is_temporary(&self) -> bool {
        matches!(self.code, Some(libc::EAI_AGAIN) | Some(libc::EAI_NONAME))
    }
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl error::Error for ResolveError {}

/// Resolve `host:port` to socket addresses with `getaddrinfo`, stream
/// sockets only.
pub fn lookup_host(host: &str, port: u16) -> Result<Vec<SocketAddr>, ResolveError> {
    let c_host = CString::new(host)
        .map_err(|_| ResolveError::other("host name contains an interior nul byte"))?;
    let c_port = match CString::new(port.to_string()) {
        Ok(c_port) => c_port,
        Err(_) => unreachable!("a formatted integer contains no nul byte"),
    };

    let mut hints: libc::addrinfo = unsafe { mem::zeroed() };
    hints.ai_family = libc::AF_UNSPEC;
    hints.ai_socktype = libc::SOCK_STREAM;

    let mut list = ptr::null_mut();
    let code = unsafe { libc::getaddrinfo(c_host.as_ptr(), c_port.as_ptr(), &hints, &mut list) };
    if code != 0 {
        let message = if code == libc::EAI_SYSTEM {
            io::Error::last_os_error().to_string()
        } else {
            unsafe { CStr::from_ptr(libc::gai_strerror(code)) }
                .to_string_lossy()
                .into_owned()
        };
        return Err(ResolveError {
            code: Some(code),
            message,
        });
    }

    let mut addrs = Vec::new();
    let mut cursor = list;
    while !cursor.is_null() {
        let info = unsafe { &*cursor };
        match info.ai_family {
            libc::AF_INET => {
                let sa = unsafe { &*info.ai_addr.cast::<libc::sockaddr_in>() };
                let ip = Ipv4Addr::from(u32::from_be(sa.sin_addr.s_addr));
                addrs.push(SocketAddr::from((ip, u16::from_be(sa.sin_port))));
            }
            libc::AF_INET6 => {
                let sa = unsafe { &*info.ai_addr.cast::<libc::sockaddr_in6>() };
                let ip = Ipv6Addr::from(sa.sin6_addr.s6_addr);
                addrs.push(SocketAddr::V6(SocketAddrV6::new(
                    ip,
                    u16::from_be(sa.sin6_port),
                    sa.sin6_flowinfo,
                    sa.sin6_scope_id,
                )));
            }
            _ => {}
        }
        cursor = info.ai_next;
    }
    unsafe { libc::freeaddrinfo(list) };

    Ok(addrs)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn numeric_host_resolves_without_dns() {
        let addrs = lookup_host("127.0.0.1", 8080).unwrap();
        assert_eq!(addrs, [SocketAddr::from(([127, 0, 0, 1], 8080))]);
    }

    #[test]
    fn unresolvable_name_keeps_the_gai_code() {
        // `.invalid` names never resolve: EAI_NONAME normally, EAI_AGAIN
        // when no resolver is reachable. Both count as temporary.
        let err = lookup_host("name.invalid", 80).unwrap_err();
        assert!(matches!(
            err.code(),
            Some(libc::EAI_NONAME) | Some(libc::EAI_AGAIN)
        ));
        assert!(err.is_temporary());
    }

    #[test]
    fn other_failures_are_permanent() {
        let err = ResolveError::other("name resolved to no addresses");
        assert_eq!(err.code(), None);
        assert!(!err.is_temporary());
    }
}
