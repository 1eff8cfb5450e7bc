// ABOUTME: DNS resolver installed in the reqwest client that enforces the IP deny-list at connect time.
// ABOUTME: Denied addresses surface as a Denied error in the request's source chain.

use std::error::Error as StdError;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use ipnet::IpNet;
use reqwest::dns::{Addrs, Name, Resolve, Resolving};

use super::denylist::DenyList;

/// A destination address matched a deny-list rule.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("ip {ip} is blocked by rule {rule}")]
pub struct Denied {
    pub ip: IpAddr,
    pub rule: IpNet,
}

impl Denied {
    /// Fails with the first rule containing `ip`.
    pub fn check(deny: &DenyList, ip: IpAddr) -> Result<(), Denied> {
        match deny.matching_rule(&ip) {
            Some(rule) => Err(Denied { ip, rule: *rule }),
            None => Ok(()),
        }
    }

    /// Find a Denied error anywhere in `err`'s source chain.
    pub fn find<'a>(err: &'a (dyn StdError + 'static)) -> Option<&'a Denied> {
        let mut next = Some(err);
        while let Some(e) = next {
            if let Some(denied) = e.downcast_ref::<Denied>() {
                return Some(denied);
            }
            next = e.source();
        }
        None
    }
}

/// Resolves with tokio and refuses names with any address on the deny-list.
///
/// Every connection reqwest opens goes through here, including redirect
/// hops, so a name cannot pass a check and then resolve somewhere else.
#[derive(Debug, Clone)]
pub struct DenyListResolver {
    deny: Arc<DenyList>,
}

impl DenyListResolver {
    pub fn new(deny: Arc<DenyList>) -> Self {
        Self { deny }
    }
}

impl Resolve for DenyListResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let deny = Arc::clone(&self.deny);
        Box::pin(async move {
            let host = name.as_str();
            let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, 0)).await?.collect();
            for addr in &addrs {
                if let Err(denied) = Denied::check(&deny, addr.ip()) {
                    tracing::warn!(host, ip = %denied.ip, rule = %denied.rule, "destination blocked");
                    return Err(denied.into());
                }
            }
            let addrs: Addrs = Box::new(addrs.into_iter());
            Ok::<_, Box<dyn StdError + Send + Sync>>(addrs)
        })
    }
}
