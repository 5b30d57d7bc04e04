// Operational commands and configuration xpaths issued by the poller.

use quick_xml::escape::escape;

pub const OP_SHOW_SYSTEM_INFO: &str = "<show><system><info></info></system></show>";
pub const OP_SHOW_INTERFACE_ALL: &str = "<show><interface>all</interface></show>";
pub const OP_SHOW_RESOURCE_MONITOR: &str =
    "<show><running><resource-monitor></resource-monitor></running></show>";
pub const OP_SHOW_COUNTER_INTERFACE: &str =
    "<show><counter><interface>all</interface></counter></show>";
pub const OP_SHOW_SESSION_INFO: &str = "<show><session><info></info></session></show>";
pub const OP_SHOW_SYSTEM_RESOURCES: &str =
    "<show><system><resources></resources></system></show>";
pub const OP_SHOW_COUNTER_GLOBAL: &str = "<show><counter><global></global></counter></show>";
pub const OP_SHOW_GPGW_STATS: &str =
    "<show><global-protect-gateway><statistics></statistics></global-protect-gateway></show>";

/// Virtual systems configured on the device.
pub const CONFIG_VSYS_LIST: &str = "/config/devices/entry[@name='localhost.localdomain']/vsys";

/// Build a counting `show session all` command for the given filter.
pub fn session_all_count(filter: &[(String, String)]) -> String {
    let mut cmd = String::from("<show><session><all><filter>");
    for (attr, value) in filter {
        cmd.push('<');
        cmd.push_str(attr);
        cmd.push('>');
        cmd.push_str(&escape(value.as_str()));
        cmd.push_str("</");
        cmd.push_str(attr);
        cmd.push('>');
    }
    cmd.push_str("<count>yes</count></filter></all></session></show>");
    cmd
}
