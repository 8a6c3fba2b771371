//! Ping probe: repeated ICMP echoes summarised as packet loss and mean RTT.
//!
//! Echoes use native ICMP sockets in spawn_blocking for sub-millisecond
//! timing, with the system `ping` command as fallback.

use std::mem::MaybeUninit;
use std::net::{IpAddr, SocketAddr};
use std::process::Stdio;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::process::Command;

use super::{Probe, ProbeError};
use crate::metrics::{MetricsSink, PING_PACKET_LOSS, PING_RTT};

/// Sends a single echo request and waits for the matching reply.
#[async_trait]
pub trait Pinger: Send + Sync {
    /// Round-trip time of one echo, or why it failed.
    async fn echo(&self, target: &str, timeout: Duration) -> Result<Duration, ProbeError>;
}

/// Summary of one ping check.
#[derive(Debug, Clone)]
pub struct PingResult {
    pub target: String,
    pub avg_rtt_ms: f64,
    pub packet_loss_percent: f64,
    pub successful_probes: u32,
    pub total_probes: u32,
    pub checked_at: DateTime<Utc>,
}

impl PingResult {
    fn summarise(target: &str, total: u32, successful: u32, rtt_sum_ms: f64) -> Self {
        let total = total.max(1);
        let lost = total.saturating_sub(successful);
        let packet_loss_percent = (f64::from(lost) / f64::from(total) * 100.0).clamp(0.0, 100.0);
        let avg_rtt_ms = if successful > 0 {
            rtt_sum_ms / f64::from(successful)
        } else {
            0.0
        };

        Self {
            target: target.to_string(),
            avg_rtt_ms,
            packet_loss_percent,
            successful_probes: successful,
            total_probes: total,
            checked_at: Utc::now(),
        }
    }
}

/// Ping probe: `count` sequential echoes, each bounded by `timeout`.
pub struct PingProbe {
    pinger: Arc<dyn Pinger>,
    sink: Arc<dyn MetricsSink>,
    count: u32,
    timeout: Duration,
    pacing: Duration,
}

impl PingProbe {
    pub const DEFAULT_COUNT: u32 = 10;
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);
    /// Pause between attempts so targets don't rate-limit us.
    pub const PACING: Duration = Duration::from_millis(100);

    pub fn new(pinger: Arc<dyn Pinger>, sink: Arc<dyn MetricsSink>) -> Self {
        Self {
            pinger,
            sink,
            count: Self::DEFAULT_COUNT,
            timeout: Self::DEFAULT_TIMEOUT,
            pacing: Self::PACING,
        }
    }

    pub fn with_count(mut self, count: u32) -> Self {
        self.count = count.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run `count` echoes against `target`.
    ///
    /// Individual echo failures are counted as lost packets. Each successful
    /// RTT is recorded as it arrives and the packet loss once at the end; a
    /// sink failure aborts the check.
    pub async fn check_with(
        &self,
        target: &str,
        count: u32,
        timeout: Duration,
    ) -> Result<PingResult, ProbeError> {
        let count = count.max(1);
        let tags = [("target", target)];
        let mut successful = 0u32;
        let mut rtt_sum_ms = 0.0;

        for _ in 0..count {
            match self.pinger.echo(target, timeout).await {
                Ok(rtt) => {
                    let rtt_ms = rtt.as_secs_f64() * 1000.0;
                    successful += 1;
                    rtt_sum_ms += rtt_ms;
                    self.sink.record_histogram(PING_RTT, rtt_ms, &tags)?;
                }
                Err(e) => {
                    tracing::debug!("Ping failed for {}: {}", target, e);
                }
            }
            tokio::time::sleep(self.pacing).await;
        }

        let result = PingResult::summarise(target, count, successful, rtt_sum_ms);
        self.sink
            .record_histogram(PING_PACKET_LOSS, result.packet_loss_percent, &tags)?;

        tracing::info!(
            host = %target,
            "Ping check - Target: {}, RTT: {:.2}ms, Packet Loss: {:.1}%",
            target,
            result.avg_rtt_ms,
            result.packet_loss_percent
        );
        Ok(result)
    }
}

#[async_trait]
impl Probe for PingProbe {
    type Output = PingResult;

    fn kind(&self) -> &'static str {
        "ping"
    }

    async fn check(&self, target: &str) -> Result<PingResult, ProbeError> {
        let result = self.check_with(target, self.count, self.timeout).await;
        if let Err(e) = &result {
            tracing::error!("Ping check error for {}: {}", target, e);
        }
        result
    }
}

/// ICMP capability state
#[derive(Debug, Clone, Copy, PartialEq)]
enum IcmpCapability {
    /// Native ICMP sockets are available
    Native,
    /// Only command fallback is available
    CommandOnly,
}

static ICMP_CAPABILITY: OnceLock<IcmpCapability> = OnceLock::new();

/// Ping sequence counter for unique identification
static PING_SEQUENCE: AtomicU16 = AtomicU16::new(0);

/// Identifier/sequence pair distinguishing concurrent pings to one host.
fn generate_ping_id() -> (u16, u16) {
    let identifier: u16 = rand::random();
    let sequence = PING_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    (identifier, sequence)
}

fn detect_icmp_capability() -> IcmpCapability {
    // RAW needs CAP_NET_RAW; DGRAM works unprivileged where ping_group_range allows it
    if Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4)).is_ok() {
        tracing::info!("Ping probe: using native ICMP (RAW socket, privileged)");
        return IcmpCapability::Native;
    }
    if Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::ICMPV4)).is_ok() {
        tracing::info!("Ping probe: using native ICMP (DGRAM socket, unprivileged)");
        return IcmpCapability::Native;
    }

    tracing::info!("Ping probe: native ICMP unavailable, using command fallback");
    IcmpCapability::CommandOnly
}

/// Pinger backed by ICMP sockets or the system `ping` binary.
#[derive(Debug, Default, Clone, Copy)]
pub struct IcmpPinger;

#[async_trait]
impl Pinger for IcmpPinger {
    async fn echo(&self, target: &str, timeout: Duration) -> Result<Duration, ProbeError> {
        let capability = *ICMP_CAPABILITY.get_or_init(detect_icmp_capability);
        if capability == IcmpCapability::CommandOnly {
            return run_ping_command(target, timeout).await;
        }

        // Resolve before spawn_blocking, DNS is async
        let ip = resolve_address(target).await?;
        let result = tokio::task::spawn_blocking(move || blocking_echo(ip, timeout))
            .await
            .map_err(|e| ProbeError::Transport(format!("spawn_blocking failed: {}", e)))?;

        match result {
            Err(ProbeError::Transport(msg))
                if msg.contains("Permission") || msg.contains("not permitted") =>
            {
                tracing::warn!(
                    "Native ping not permitted for {}, falling back to command: {}",
                    target,
                    msg
                );
                run_ping_command(target, timeout).await
            }
            other => other,
        }
    }
}

async fn resolve_address(address: &str) -> Result<IpAddr, ProbeError> {
    if let Ok(ip) = address.parse::<IpAddr>() {
        return Ok(ip);
    }

    tokio::net::lookup_host(format!("{}:0", address))
        .await
        .map_err(|e| ProbeError::Transport(format!("DNS resolution failed: {}", e)))?
        .next()
        .map(|sa| sa.ip())
        .ok_or_else(|| ProbeError::Transport(format!("No addresses found for {}", address)))
}

/// Per-address-family details of an ICMP echo exchange.
struct EchoFamily {
    domain: Domain,
    protocol: Protocol,
    request_type: u8,
    reply_type: u8,
    /// ICMPv6 checksums are filled in by the kernel
    compute_checksum: bool,
}

const ECHO_V4: EchoFamily = EchoFamily {
    domain: Domain::IPV4,
    protocol: Protocol::ICMPV4,
    request_type: 8,
    reply_type: 0,
    compute_checksum: true,
};

const ECHO_V6: EchoFamily = EchoFamily {
    domain: Domain::IPV6,
    protocol: Protocol::ICMPV6,
    request_type: 128,
    reply_type: 129,
    compute_checksum: false,
};

/// One echo over a blocking socket. Runs on the blocking pool.
fn blocking_echo(ip: IpAddr, timeout: Duration) -> Result<Duration, ProbeError> {
    let family = if ip.is_ipv4() { &ECHO_V4 } else { &ECHO_V6 };
    let net_err = |what: &str, e: std::io::Error| {
        if e.kind() == std::io::ErrorKind::PermissionDenied {
            ProbeError::Transport(format!("Permission denied: {}", e))
        } else {
            ProbeError::Transport(format!("{}: {}", what, e))
        }
    };

    let (socket, kind) = match Socket::new(family.domain, Type::RAW, Some(family.protocol)) {
        Ok(socket) => (socket, SocketKind::Raw),
        Err(_) => (
            Socket::new(family.domain, Type::DGRAM, Some(family.protocol))
                .map_err(|e| net_err("Failed to create ICMP socket", e))?,
            SocketKind::Datagram,
        ),
    };
    socket
        .set_read_timeout(Some(timeout))
        .map_err(|e| net_err("Failed to set timeout", e))?;
    socket
        .set_write_timeout(Some(timeout))
        .map_err(|e| net_err("Failed to set timeout", e))?;
    socket
        .connect(&SocketAddr::new(ip, 0).into())
        .map_err(|e| net_err("Failed to connect", e))?;

    let (identifier, sequence) = generate_ping_id();
    let packet = build_echo_request(family, identifier, sequence);

    let start = Instant::now();
    socket
        .send(&packet)
        .map_err(|e| net_err("Failed to send", e))?;

    // Other processes' replies may arrive on a RAW socket; wait for ours
    let mut buf = [MaybeUninit::<u8>::uninit(); 1500];
    loop {
        let len = socket.recv(&mut buf).map_err(|e| match e.kind() {
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => {
                ProbeError::Timeout(timeout)
            }
            _ => net_err("Failed to receive", e),
        })?;
        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return Err(ProbeError::Timeout(timeout));
        }

        // SAFETY: recv initialized the first `len` bytes
        let reply = unsafe { std::slice::from_raw_parts(buf.as_ptr() as *const u8, len) };
        if is_matching_reply(family, kind, reply, identifier, sequence) {
            return Ok(elapsed);
        }
    }
}

/// Which kind of ICMP socket carried the echo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SocketKind {
    Raw,
    /// Unprivileged ping socket. The kernel overwrites the echo identifier
    /// with the socket's port and only delivers replies for this socket.
    Datagram,
}

fn is_matching_reply(
    family: &EchoFamily,
    kind: SocketKind,
    reply: &[u8],
    identifier: u16,
    sequence: u16,
) -> bool {
    // RAW IPv4 sockets deliver the IP header in front of the ICMP message
    let offset = if kind == SocketKind::Raw
        && family.compute_checksum
        && reply.first().map(|b| b >> 4) == Some(4)
    {
        usize::from(reply[0] & 0x0F) * 4
    } else {
        0
    };
    let Some(icmp) = reply.get(offset..offset + 8) else {
        return false;
    };

    icmp[0] == family.reply_type
        && (kind == SocketKind::Datagram || u16::from_be_bytes([icmp[4], icmp[5]]) == identifier)
        && u16::from_be_bytes([icmp[6], icmp[7]]) == sequence
}

/// Build an echo request: 8 byte header plus 56 byte timestamped payload.
fn build_echo_request(family: &EchoFamily, identifier: u16, sequence: u16) -> Vec<u8> {
    let mut packet = vec![0u8; 64];
    packet[0] = family.request_type;
    packet[1] = 0;
    packet[4..6].copy_from_slice(&identifier.to_be_bytes());
    packet[6..8].copy_from_slice(&sequence.to_be_bytes());

    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    packet[8..16].copy_from_slice(&timestamp.to_be_bytes());

    if family.compute_checksum {
        let checksum = icmp_checksum(&packet);
        packet[2..4].copy_from_slice(&checksum.to_be_bytes());
    }
    packet
}

/// Internet checksum (RFC 1071).
fn icmp_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = data
        .chunks(2)
        .map(|pair| match pair {
            [hi, lo] => u32::from(u16::from_be_bytes([*hi, *lo])),
            [hi] => u32::from(*hi) << 8,
            _ => 0,
        })
        .sum();

    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

/// One echo via the system `ping` binary.
async fn run_ping_command(address: &str, timeout: Duration) -> Result<Duration, ProbeError> {
    let timeout_secs = timeout.as_secs().max(1);

    let output = Command::new("ping")
        .args(["-c", "1", "-W", &timeout_secs.to_string(), address])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| ProbeError::Command(format!("failed to execute ping: {}", e)))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("timeout")
            || stdout.contains("100% packet loss")
            || stdout.contains("100.0% packet loss")
        {
            return Err(ProbeError::Timeout(timeout));
        }
        return Err(ProbeError::Command(format!("ping failed: {}", stdout)));
    }

    parse_ping_output(&stdout)
}

/// Extract the round-trip time from `ping` output.
///
/// Tries the per-packet `time=` field first, then the macOS and Linux
/// summary lines.
fn parse_ping_output(output: &str) -> Result<Duration, ProbeError> {
    static PATTERNS: OnceLock<[Regex; 3]> = OnceLock::new();
    let patterns = PATTERNS.get_or_init(|| {
        [
            Regex::new(r"time[=<](?P<ms>[0-9.]+)\s*ms").unwrap(),
            Regex::new(r"round-trip\s+min/avg/max/stddev\s*=\s*[0-9.]+/(?P<ms>[0-9.]+)/").unwrap(),
            Regex::new(r"rtt\s+min/avg/max/mdev\s*=\s*[0-9.]+/(?P<ms>[0-9.]+)/").unwrap(),
        ]
    });

    patterns
        .iter()
        .filter_map(|re| re.captures(output))
        .filter_map(|caps| caps.name("ms")?.as_str().parse::<f64>().ok())
        .find(|ms| ms.is_finite() && *ms >= 0.0)
        .map(|ms| Duration::from_secs_f64(ms / 1000.0))
        .ok_or_else(|| ProbeError::Command(format!("failed to parse ping output: {}", output)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::testing::RecordingSink;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays a fixed sequence of echo outcomes; `None` is a timeout.
    struct ScriptedPinger {
        script: Mutex<VecDeque<Option<Duration>>>,
    }

    impl ScriptedPinger {
        fn new(script: impl IntoIterator<Item = Option<Duration>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into_iter().collect()),
            })
        }
    }

    #[async_trait]
    impl Pinger for ScriptedPinger {
        async fn echo(&self, _target: &str, timeout: Duration) -> Result<Duration, ProbeError> {
            match self.script.lock().unwrap().pop_front().flatten() {
                Some(rtt) => Ok(rtt),
                None => Err(ProbeError::Timeout(timeout)),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_the_echoes_time_out() {
        let rtts = [10u64, 20, 30, 40, 50];
        let script = rtts
            .iter()
            .flat_map(|ms| [Some(Duration::from_millis(*ms)), None]);
        let sink = Arc::new(RecordingSink::new());
        let probe = PingProbe::new(ScriptedPinger::new(script), sink.clone());

        let result = probe.check("example.com").await.unwrap();
        assert_eq!(result.total_probes, 10);
        assert_eq!(result.successful_probes, 5);
        assert_eq!(result.packet_loss_percent, 50.0);
        assert!((result.avg_rtt_ms - 30.0).abs() < 1e-9);

        let samples = sink.named(PING_RTT);
        assert_eq!(samples.len(), 5);
        assert!(samples.iter().all(|m| m.tag("target") == Some("example.com")));
        let loss = sink.named(PING_PACKET_LOSS);
        assert_eq!(loss.len(), 1);
        assert_eq!(loss[0].value, 50.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_echoes_lost() {
        let sink = Arc::new(RecordingSink::new());
        let probe = PingProbe::new(ScriptedPinger::new([None, None, None]), sink.clone())
            .with_count(3);

        let result = probe.check("10.255.255.1").await.unwrap();
        assert_eq!(result.successful_probes, 0);
        assert_eq!(result.packet_loss_percent, 100.0);
        assert_eq!(result.avg_rtt_ms, 0.0);
        assert!(sink.named(PING_RTT).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_are_paced() {
        let sink = Arc::new(RecordingSink::new());
        let probe = PingProbe::new(ScriptedPinger::new(Vec::new()), sink).with_count(4);

        let start = tokio::time::Instant::now();
        probe.check("example.com").await.unwrap();
        assert!(start.elapsed() >= PingProbe::PACING * 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sink_failure_fails_the_check() {
        let sink = Arc::new(RecordingSink::failing_on(PING_PACKET_LOSS));
        let probe = PingProbe::new(
            ScriptedPinger::new([Some(Duration::from_millis(5))]),
            sink,
        )
        .with_count(1);

        let err = probe.check("example.com").await.unwrap_err();
        assert!(matches!(err, ProbeError::Sink(_)));
        assert!(err.to_string().contains("sink unavailable"));
    }

    #[test]
    fn test_icmp_checksum() {
        let mut packet = vec![0u8; 8];
        packet[0] = 8;
        packet[4] = 0x12;
        packet[5] = 0x34;
        packet[7] = 0x01;

        let checksum = icmp_checksum(&packet);
        assert_ne!(checksum, 0);

        // A packet carrying its own checksum sums to zero
        packet[2..4].copy_from_slice(&checksum.to_be_bytes());
        assert_eq!(icmp_checksum(&packet), 0);
    }

    #[test]
    fn test_build_echo_requests() {
        let v4 = build_echo_request(&ECHO_V4, 0x1234, 0x0001);
        assert_eq!(v4.len(), 64);
        assert_eq!(v4[0], 8);
        assert_eq!(v4[4..6], [0x12, 0x34]);
        assert_eq!(v4[6..8], [0x00, 0x01]);
        assert_eq!(icmp_checksum(&v4), 0);

        let v6 = build_echo_request(&ECHO_V6, 0x1234, 0x0002);
        assert_eq!(v6[0], 128);
        assert_eq!(v6[2..4], [0, 0]);
    }

    #[test]
    fn test_reply_matching() {
        let mut reply = vec![0u8; 8];
        reply[4..6].copy_from_slice(&7u16.to_be_bytes());
        reply[6..8].copy_from_slice(&9u16.to_be_bytes());
        assert!(is_matching_reply(&ECHO_V4, SocketKind::Raw, &reply, 7, 9));
        assert!(!is_matching_reply(&ECHO_V4, SocketKind::Raw, &reply, 7, 10));
        assert!(!is_matching_reply(&ECHO_V4, SocketKind::Raw, &reply, 8, 9));

        // Same reply behind a 20 byte IPv4 header
        let mut raw = vec![0x45u8];
        raw.extend_from_slice(&[0u8; 19]);
        raw.extend_from_slice(&reply);
        assert!(is_matching_reply(&ECHO_V4, SocketKind::Raw, &raw, 7, 9));

        reply[0] = 129;
        assert!(is_matching_reply(&ECHO_V6, SocketKind::Raw, &reply, 7, 9));
        assert!(!is_matching_reply(&ECHO_V6, SocketKind::Raw, &reply[..6], 7, 9));
    }

    #[test]
    fn test_datagram_reply_carries_kernel_identifier() {
        // The kernel replaced our identifier 7 with its port 40123
        let mut reply = vec![0u8; 8];
        reply[4..6].copy_from_slice(&40123u16.to_be_bytes());
        reply[6..8].copy_from_slice(&9u16.to_be_bytes());

        assert!(is_matching_reply(&ECHO_V4, SocketKind::Datagram, &reply, 7, 9));
        assert!(!is_matching_reply(&ECHO_V4, SocketKind::Datagram, &reply, 7, 10));
        assert!(!is_matching_reply(&ECHO_V4, SocketKind::Raw, &reply, 7, 9));

        // An echo request looped back is not a reply
        reply[0] = 8;
        assert!(!is_matching_reply(&ECHO_V4, SocketKind::Datagram, &reply, 7, 9));

        reply[0] = 129;
        assert!(is_matching_reply(&ECHO_V6, SocketKind::Datagram, &reply, 7, 9));
    }

    #[test]
    fn test_parse_ping_output_linux() {
        let output = "64 bytes from 8.8.8.8: icmp_seq=1 ttl=117 time=12.345 ms";
        let rtt = parse_ping_output(output).unwrap();
        assert!((rtt.as_secs_f64() * 1000.0 - 12.345).abs() < 1e-6);
    }

    #[test]
    fn test_parse_ping_output_macos_summary() {
        let output = r#"PING google.com (142.250.69.174): 56 data bytes

--- google.com ping statistics ---
1 packets transmitted, 1 packets received, 0.0% packet loss
round-trip min/avg/max/stddev = 17.906/17.906/17.906/0.000 ms"#;
        let rtt = parse_ping_output(output).unwrap();
        assert!((rtt.as_secs_f64() * 1000.0 - 17.906).abs() < 1e-6);
    }

    #[test]
    fn test_parse_ping_output_prefers_per_packet_time() {
        let output = r#"PING 8.8.8.8 (8.8.8.8) 56(84) bytes of data.
64 bytes from 8.8.8.8: icmp_seq=1 ttl=117 time=12.3 ms

--- 8.8.8.8 ping statistics ---
1 packets transmitted, 1 received, 0% packet loss, time 0ms
rtt min/avg/max/mdev = 11.000/11.500/12.000/0.000 ms"#;
        let rtt = parse_ping_output(output).unwrap();
        assert!((rtt.as_secs_f64() * 1000.0 - 12.3).abs() < 1e-6);
    }

    #[test]
    fn test_parse_ping_output_garbage() {
        assert!(matches!(
            parse_ping_output("ping: unknown host"),
            Err(ProbeError::Command(_))
        ));
    }
}
