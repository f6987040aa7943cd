// ── Host monitoring contract ──
//
// The observer resolves gateway locations only for addresses it has been
// asked to watch. The engine asks once per tracked gateway IP and
// cancels when the last owning access point goes away.

use std::net::IpAddr;

pub trait HostMonitor: Send + Sync {
    fn start_monitoring_ip(&self, ip: IpAddr);

    fn stop_monitoring_ip(&self, ip: IpAddr);
}
