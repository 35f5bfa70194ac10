//! Probe executor.
//!
//! A probe runs up to `count` reachability attempts against one address and
//! reports whether any of them succeeded. The default [`TcpProber`] counts a
//! completed TCP handshake as a reply, which needs no raw sockets and no
//! elevated privileges.

use std::future::Future;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use thiserror::Error;
use tokio::net::{lookup_host, TcpStream};
use tokio::time::{self, Instant};

/// Attempt budget for one probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbePlan {
    /// Attempts before giving up. Zero is treated as one.
    pub count: u32,
    /// Budget of each attempt, and of address resolution.
    pub timeout: Duration,
    /// Pause between attempts.
    pub spacing: Duration,
}

impl ProbePlan {
    /// Longest a probe against an unresponsive address can take, excluding
    /// resolution.
    pub fn worst_case(&self) -> Duration {
        let attempts = self.count.max(1);
        self.timeout
            .saturating_mul(attempts)
            .saturating_add(self.spacing.saturating_mul(attempts - 1))
    }
}

/// The probe could not be executed at all. Distinct from an unreachable
/// target, which is `Ok(false)`.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to resolve {address}: {source}")]
    Resolve {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("{address} resolved to no addresses")]
    NoAddress { address: String },
}

/// Reachability check against a single address.
pub trait Prober: Send + Sync + 'static {
    /// `Ok(true)` if at least one attempt got a reply.
    fn probe(
        &self,
        address: &str,
        plan: &ProbePlan,
    ) -> impl Future<Output = Result<bool, ProbeError>> + Send;
}

/// Unprivileged TCP-connect prober.
#[derive(Debug, Clone)]
pub struct TcpProber {
    default_port: u16,
}

impl TcpProber {
    /// `default_port` is used for addresses that do not name a port.
    pub fn new(default_port: u16) -> Self {
        Self { default_port }
    }

    async fn resolve(&self, address: &str, budget: Duration) -> Result<Vec<SocketAddr>, ProbeError> {
        if let Ok(addr) = address.parse::<SocketAddr>() {
            return Ok(vec![addr]);
        }
        let bare = address.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = bare.parse::<IpAddr>() {
            return Ok(vec![SocketAddr::new(ip, self.default_port)]);
        }

        let has_port = address
            .rsplit_once(':')
            .is_some_and(|(host, port)| !host.contains(':') && port.parse::<u16>().is_ok());
        let lookup = async {
            if has_port {
                lookup_host(address).await.map(|addrs| addrs.collect::<Vec<_>>())
            } else {
                lookup_host((address, self.default_port))
                    .await
                    .map(|addrs| addrs.collect::<Vec<_>>())
            }
        };

        let addrs = match time::timeout(budget, lookup).await {
            Ok(Ok(addrs)) => addrs,
            Ok(Err(source)) => {
                return Err(ProbeError::Resolve {
                    address: address.to_string(),
                    source,
                })
            }
            Err(_) => {
                return Err(ProbeError::Resolve {
                    address: address.to_string(),
                    source: io::Error::new(io::ErrorKind::TimedOut, "resolution timed out"),
                })
            }
        };

        if addrs.is_empty() {
            return Err(ProbeError::NoAddress {
                address: address.to_string(),
            });
        }
        Ok(addrs)
    }
}

impl Default for TcpProber {
    fn default() -> Self {
        Self::new(80)
    }
}

/// Budget of one attempt. Resolution time is charged to the first attempt,
/// keeping a probe within [`ProbePlan::worst_case`].
fn attempt_budget(plan: &ProbePlan, attempt: u32, resolving: Duration) -> Duration {
    if attempt == 1 {
        plan.timeout.saturating_sub(resolving)
    } else {
        plan.timeout
    }
}

impl Prober for TcpProber {
    async fn probe(&self, address: &str, plan: &ProbePlan) -> Result<bool, ProbeError> {
        let started = Instant::now();
        let addrs = self.resolve(address, plan.timeout).await?;
        let resolving = started.elapsed();
        let attempts = plan.count.max(1);

        for attempt in 1..=attempts {
            if attempt > 1 {
                time::sleep(plan.spacing).await;
            }
            let budget = attempt_budget(plan, attempt, resolving);
            if budget.is_zero() {
                tracing::debug!(address, attempt, "Resolution used the attempt budget");
                continue;
            }
            match time::timeout(budget, TcpStream::connect(&addrs[..])).await {
                Ok(Ok(_stream)) => {
                    tracing::trace!(address, attempt, "Probe reply");
                    return Ok(true);
                }
                Ok(Err(e)) => {
                    tracing::debug!(address, attempt, error = %e, "Probe attempt failed");
                }
                Err(_) => {
                    tracing::debug!(address, attempt, "Probe attempt timed out");
                }
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn plan(count: u32) -> ProbePlan {
        ProbePlan {
            count,
            timeout: Duration::from_millis(500),
            spacing: Duration::from_millis(20),
        }
    }

    #[tokio::test]
    async fn test_listening_address_is_alive() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let prober = TcpProber::default();
        assert!(prober.probe(&addr.to_string(), &plan(3)).await.unwrap());
    }

    #[tokio::test]
    async fn test_bare_ip_uses_default_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let prober = TcpProber::new(port);
        assert!(prober.probe("127.0.0.1", &plan(1)).await.unwrap());
    }

    #[tokio::test]
    async fn test_closed_port_is_unreachable_within_budget() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let plan = plan(3);
        let started = Instant::now();
        let alive = TcpProber::default().probe(&addr.to_string(), &plan).await.unwrap();

        assert!(!alive);
        assert!(started.elapsed() <= plan.worst_case() + Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_silent_address_is_unreachable_within_budget() {
        // TEST-NET-1 is never routed, so attempts either hang until their
        // timeout or fail at once.
        let plan = ProbePlan {
            count: 2,
            timeout: Duration::from_millis(200),
            spacing: Duration::from_millis(20),
        };
        let started = Instant::now();
        let alive = TcpProber::default().probe("192.0.2.1:9", &plan).await.unwrap();

        assert!(!alive);
        assert!(started.elapsed() <= plan.worst_case() + Duration::from_millis(300));
    }

    #[test]
    fn test_resolution_is_charged_to_first_attempt() {
        let plan = ProbePlan {
            count: 3,
            timeout: Duration::from_secs(10),
            spacing: Duration::from_millis(500),
        };
        assert_eq!(attempt_budget(&plan, 1, Duration::from_secs(4)), Duration::from_secs(6));
        assert_eq!(attempt_budget(&plan, 1, Duration::from_secs(12)), Duration::ZERO);
        assert_eq!(attempt_budget(&plan, 2, Duration::from_secs(4)), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_unresolvable_name_is_a_probe_error() {
        let err = TcpProber::default()
            .probe("no-such-host.invalid", &plan(1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProbeError::Resolve { .. } | ProbeError::NoAddress { .. }
        ));
    }

    #[test]
    fn test_worst_case_budget() {
        let plan = ProbePlan {
            count: 3,
            timeout: Duration::from_secs(10),
            spacing: Duration::from_millis(500),
        };
        assert_eq!(plan.worst_case(), Duration::from_secs(31));
        assert_eq!(
            ProbePlan { count: 0, ..plan }.worst_case(),
            Duration::from_secs(10)
        );
    }
}
