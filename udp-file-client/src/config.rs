//! Client timing and buffer parameters.

use std::time::Duration;

use crate::socket::MAX_DATAGRAM;

/// Adjustable client parameters.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Silence after which the identical request is sent again.  Fixed: there
    /// is no back-off and no cap on the number of retransmissions.
    pub retransmit_interval: Duration,
    /// How long a cache entry is trusted without asking the server.
    pub cache_interval: Duration,
    /// Upper bound on waiting for a reply.  `None` waits forever.
    pub deadline: Option<Duration>,
    /// Receive buffer size.
    pub max_datagram: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            retransmit_interval: Duration::from_secs(1),
            cache_interval: Duration::from_secs(30),
            deadline: None,
            max_datagram: MAX_DATAGRAM,
        }
    }
}
