//! Detection of replies that only echo the caller's address.
//!
//! Some backends answer a blocked request with the public IP address of the
//! host instead of a completion. Such a reply is not an error, but it is not
//! an answer either.

use std::net::IpAddr;

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct SoftBlockDetector {
    public_ip: Option<IpAddr>,
}

impl SoftBlockDetector {
    pub(crate) fn new(public_ip: Option<IpAddr>) -> SoftBlockDetector {
        SoftBlockDetector { public_ip }
    }

    /// With a known public address, any reply mentioning it is blocked.
    /// Otherwise a reply made of nothing but an address is.
    pub(crate) fn is_blocked(&self, text: &str) -> bool {
        match self.public_ip {
            Some(ip) => text.contains(&ip.to_string()),
            None => text.trim().parse::<IpAddr>().is_ok(),
        }
    }
}
