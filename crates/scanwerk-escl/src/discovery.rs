// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// mDNS service discovery for eSCL scanners on the local network.
//
// We browse for `_uscan._tcp.local.` (plain HTTP) and `_uscans._tcp.local.`
// (HTTPS) using the `mdns-sd` crate.  Each call to `discover` owns its daemon
// for the length of the browse window and shuts it down before returning, so
// no background threads outlive the search.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use mdns_sd::{Receiver, ServiceDaemon, ServiceEvent, ServiceInfo};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use scanwerk_core::config::ClientConfig;
use scanwerk_core::error::{Result, ScanError};
use scanwerk_core::types::{Device, DeviceId, with_trailing_slash};

use crate::registry::DeviceRegistry;

/// mDNS service type for plain eSCL.
pub const USCAN_SERVICE: &str = "_uscan._tcp.local.";

/// mDNS service type for TLS-secured eSCL.
pub const USCANS_SERVICE: &str = "_uscans._tcp.local.";

/// Resource path used when the TXT record has no `rs` key.
const DEFAULT_RESOURCE_PATH: &str = "eSCL";

/// A resolved service advertisement, decoupled from the mDNS library.
#[derive(Debug, Clone, PartialEq)]
pub struct Advertisement {
    /// Full service name, e.g. `Acme ScanJet._uscan._tcp.local.`.
    pub fullname: String,
    pub hostname: String,
    pub addresses: Vec<IpAddr>,
    pub port: u16,
    /// TXT record, keys lowercased.
    pub txt: HashMap<String, String>,
    pub tls: bool,
}

impl Advertisement {
    pub fn from_service_info(info: &ServiceInfo, tls: bool) -> Self {
        let mut addresses: Vec<IpAddr> = info.get_addresses().iter().copied().collect();
        addresses.sort();
        let txt = info
            .get_properties()
            .iter()
            .map(|p| (p.key().to_ascii_lowercase(), p.val_str().to_owned()))
            .collect();
        Self {
            fullname: info.get_fullname().to_owned(),
            hostname: info.get_hostname().to_owned(),
            addresses,
            port: info.get_port(),
            txt,
            tls,
        }
    }

    fn txt(&self, key: &str) -> Option<&str> {
        self.txt.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }

    /// Instance label: the full name without the service type suffix.
    pub fn instance(&self) -> &str {
        [USCAN_SERVICE, USCANS_SERVICE]
            .iter()
            .find_map(|service| {
                self.fullname
                    .strip_suffix(service)
                    .and_then(|s| s.strip_suffix('.'))
            })
            .unwrap_or(&self.fullname)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AdvertisementEvent {
    Resolved(Advertisement),
    /// The service with this full name went away.
    Removed(String),
}

/// Outcome of one bounded wait on an advertisement source.
#[derive(Debug)]
pub enum SourcePoll {
    Event(AdvertisementEvent),
    /// Nothing arrived within the wait.
    Idle,
    /// The source will never produce another event.
    Closed,
}

/// Something that yields advertisement events.  Implemented by the mDNS
/// browser and by scripted sources in tests.
pub trait AdvertisementSource {
    /// Wait at most `wait` for the next event.
    fn next_event(&mut self, wait: Duration) -> SourcePoll;
}

/// Key shared by the `_uscan` and `_uscans` advertisements of one scanner:
/// instance label plus host name.
pub fn device_key(ad: &Advertisement) -> DeviceId {
    DeviceId::new(format!("{}@{}", ad.instance(), ad.hostname))
}

/// One scanner, as advertised on either service type.
struct Sighting {
    id: DeviceId,
    plain: Option<Device>,
    secure: Option<Device>,
}

impl Sighting {
    /// The HTTPS endpoint wins when a scanner advertises both.
    fn preferred(&self) -> Option<&Device> {
        self.secure.as_ref().or(self.plain.as_ref())
    }

    fn slot(&mut self, tls: bool) -> &mut Option<Device> {
        if tls { &mut self.secure } else { &mut self.plain }
    }
}

/// Drain `source` for `timeout` and return the deduplicated device list.
///
/// A re-advertisement replaces the earlier record in place, so first-seen
/// order is kept.  A scanner seen on both service types is listed once.
/// `cancel` is checked at every `poll` boundary.
pub fn collect_devices(
    source: &mut dyn AdvertisementSource,
    timeout: Duration,
    poll: Duration,
    cancel: &CancellationToken,
) -> Result<Vec<Device>> {
    let deadline = Instant::now() + timeout;
    let mut seen: Vec<Sighting> = Vec::new();
    // full service name -> device key, for removals
    let mut services: HashMap<String, DeviceId> = HashMap::new();

    loop {
        if cancel.is_cancelled() {
            info!(found = seen.len(), "device search canceled");
            return Err(ScanError::SearchCanceled);
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }

        match source.next_event(remaining.min(poll)) {
            SourcePoll::Event(AdvertisementEvent::Resolved(ad)) => {
                let device = match advertisement_to_device(&ad) {
                    Ok(device) => device,
                    Err(e) => {
                        warn!(fullname = %ad.fullname, error = %e, "ignoring unusable advertisement");
                        continue;
                    }
                };
                services.insert(ad.fullname.clone(), device.id.clone());
                let index = match seen.iter().position(|s| s.id == device.id) {
                    Some(index) => index,
                    None => {
                        info!(name = %device.name, url = %device.base_url, "scanner resolved");
                        seen.push(Sighting {
                            id: device.id.clone(),
                            plain: None,
                            secure: None,
                        });
                        seen.len() - 1
                    }
                };
                *seen[index].slot(ad.tls) = Some(device);
            }
            SourcePoll::Event(AdvertisementEvent::Removed(fullname)) => {
                let Some(id) = services.remove(&fullname) else {
                    continue;
                };
                if let Some(index) = seen.iter().position(|s| s.id == id) {
                    *seen[index].slot(fullname.ends_with(USCANS_SERVICE)) = None;
                    if seen[index].preferred().is_none() {
                        info!(device = %id, "scanner removed");
                        seen.remove(index);
                    }
                }
            }
            SourcePoll::Idle => {}
            SourcePoll::Closed => {
                debug!("advertisement source closed early");
                break;
            }
        }
    }

    Ok(seen.iter().filter_map(Sighting::preferred).cloned().collect())
}

/// Convert a resolved advertisement into a `Device`.
///
/// TXT record keys used by eSCL scanners:
///   - `rs`     resource path (e.g. "eSCL")
///   - `ty`     human-readable make/model
///   - `UUID`   device UUID
///   - `is`     input sources, e.g. "platen,adf"
///   - `duplex` "T" or "F"
///   - `note`   physical location
pub fn advertisement_to_device(ad: &Advertisement) -> Result<Device> {
    // Prefer IPv4 for wider device compatibility.
    let ip = ad
        .addresses
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| ad.addresses.first())
        .copied()
        .ok_or_else(|| ScanError::Discovery {
            message: format!("no address for service {}", ad.fullname),
            source: None,
        })?;

    let host = match ip {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => format!("[{v6}]"),
    };
    let scheme = if ad.tls { "https" } else { "http" };
    let resource = ad
        .txt("rs")
        .unwrap_or(DEFAULT_RESOURCE_PATH)
        .trim_matches('/');
    let raw = if resource.is_empty() {
        format!("{scheme}://{host}:{}/", ad.port)
    } else {
        format!("{scheme}://{host}:{}/{resource}/", ad.port)
    };
    let base_url = Url::parse(&raw)
        .map_err(|e| ScanError::discovery_with(format!("bad service URL '{raw}'"), e))?;

    let input_sources = ad.txt("is").unwrap_or_default().to_ascii_lowercase();
    let make_and_model = ad.txt("ty").map(str::to_owned);

    Ok(Device {
        id: device_key(ad),
        name: make_and_model
            .clone()
            .unwrap_or_else(|| ad.instance().to_owned()),
        base_url: with_trailing_slash(base_url),
        make_and_model,
        uuid: ad.txt("uuid").and_then(|u| Uuid::parse_str(u).ok()),
        location: ad.txt("note").map(str::to_owned),
        has_flatbed: input_sources.contains("platen"),
        has_feeder: input_sources.contains("adf") || input_sources.contains("feeder"),
        has_duplex: txt_bool(ad, "duplex"),
        color_spaces: txt_list(ad, "cs"),
        formats: txt_list(ad, "pdl"),
        tls: ad.tls,
        last_seen: Utc::now(),
        manually_added: false,
    })
}

/// Read a boolean TXT record value.  eSCL uses "T"/"F".
fn txt_bool(ad: &Advertisement, key: &str) -> bool {
    ad.txt(key)
        .map(|v| v.eq_ignore_ascii_case("t") || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn txt_list(ad: &Advertisement, key: &str) -> Vec<String> {
    ad.txt(key)
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

/// Live mDNS browser for both eSCL service types.
pub struct MdnsSource {
    daemon: ServiceDaemon,
    receivers: Vec<(Receiver<ServiceEvent>, bool)>,
    turn: usize,
}

impl MdnsSource {
    /// Start the daemon and browse both service types.
    pub fn open() -> Result<Self> {
        let daemon = ServiceDaemon::new()
            .map_err(|e| ScanError::discovery_with("failed to start mDNS daemon", e))?;
        let mut receivers = Vec::with_capacity(2);
        for (service, tls) in [(USCAN_SERVICE, false), (USCANS_SERVICE, true)] {
            match daemon.browse(service) {
                Ok(receiver) => receivers.push((receiver, tls)),
                Err(e) => {
                    let _ = daemon.shutdown();
                    return Err(ScanError::discovery_with(format!("browse {service}"), e));
                }
            }
        }
        info!("mDNS scanner discovery started");
        Ok(Self {
            daemon,
            receivers,
            turn: 0,
        })
    }

    /// Stop browsing and shut the daemon down.
    pub fn close(self) {
        for service in [USCAN_SERVICE, USCANS_SERVICE] {
            if let Err(e) = self.daemon.stop_browse(service) {
                debug!(service, error = %e, "stop browse failed");
            }
        }
        match self.daemon.shutdown() {
            Ok(_) => info!("mDNS daemon shut down"),
            Err(e) => warn!(error = %e, "mDNS daemon shutdown failed"),
        }
    }

    fn translate(event: ServiceEvent, tls: bool) -> Option<AdvertisementEvent> {
        match event {
            ServiceEvent::ServiceResolved(info) => Some(AdvertisementEvent::Resolved(
                Advertisement::from_service_info(&info, tls),
            )),
            ServiceEvent::ServiceRemoved(_, fullname) => {
                Some(AdvertisementEvent::Removed(fullname))
            }
            other => {
                debug!(event = ?other, "mDNS event");
                None
            }
        }
    }
}

impl AdvertisementSource for MdnsSource {
    fn next_event(&mut self, wait: Duration) -> SourcePoll {
        // Drain whatever is already queued on either service type.
        for (receiver, tls) in &self.receivers {
            while let Ok(event) = receiver.try_recv() {
                if let Some(ad) = Self::translate(event, *tls) {
                    return SourcePoll::Event(ad);
                }
            }
        }
        if self.receivers.iter().all(|(r, _)| r.is_disconnected()) {
            return SourcePoll::Closed;
        }

        // Block on one receiver per call, alternating between them.
        let (receiver, tls) = &self.receivers[self.turn % self.receivers.len()];
        self.turn = self.turn.wrapping_add(1);
        match receiver.recv_timeout(wait) {
            Ok(event) => Self::translate(event, *tls)
                .map(SourcePoll::Event)
                .unwrap_or(SourcePoll::Idle),
            Err(_) => SourcePoll::Idle,
        }
    }
}

/// Discovery front end: browses, then publishes the result to the registry.
pub struct DeviceDiscovery {
    registry: Arc<DeviceRegistry>,
    default_timeout: Duration,
    poll: Duration,
}

impl DeviceDiscovery {
    pub fn new(registry: Arc<DeviceRegistry>, config: &ClientConfig) -> Self {
        Self {
            registry,
            default_timeout: config.discovery_timeout(),
            poll: config.discovery_poll(),
        }
    }

    /// Browse the network for `timeout` (or the configured default) and
    /// return the devices found.  An empty list is not an error.
    pub async fn discover(
        &self,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Device>> {
        let timeout = timeout.unwrap_or(self.default_timeout);
        let poll = self.poll;
        let token = cancel.clone();
        info!(timeout_ms = timeout.as_millis() as u64, "searching for eSCL scanners");

        let found = tokio::task::spawn_blocking(move || {
            let mut source = MdnsSource::open()?;
            let result = collect_devices(&mut source, timeout, poll, &token);
            source.close();
            result
        })
        .await
        .map_err(|e| ScanError::discovery_with("discovery task failed", e))??;

        self.publish(found)
    }

    /// Run a discovery pass against any advertisement source.
    pub async fn discover_from<S>(
        &self,
        mut source: S,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<Device>>
    where
        S: AdvertisementSource + Send + 'static,
    {
        let poll = self.poll;
        let token = cancel.clone();
        let found = tokio::task::spawn_blocking(move || {
            collect_devices(&mut source, timeout, poll, &token)
        })
        .await
        .map_err(|e| ScanError::discovery_with("discovery task failed", e))??;
        self.publish(found)
    }

    /// Register a scanner by URL, bypassing mDNS.
    pub fn add_manual(&self, url: &str) -> Result<Device> {
        let device = Device::from_url(url)?;
        info!(url = %device.base_url, "manually added scanner");
        self.registry.add(device.clone());
        Ok(device)
    }

    fn publish(&self, found: Vec<Device>) -> Result<Vec<Device>> {
        info!(count = found.len(), "device search finished");
        self.registry.publish(found);
        Ok(self.registry.devices())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;

    /// Replays a fixed event list, then stays idle (sleeping for the wait).
    struct ScriptedSource {
        events: VecDeque<AdvertisementEvent>,
        close_when_empty: bool,
    }

    impl ScriptedSource {
        fn new(events: Vec<AdvertisementEvent>) -> Self {
            Self {
                events: events.into(),
                close_when_empty: false,
            }
        }
    }

    impl AdvertisementSource for ScriptedSource {
        fn next_event(&mut self, wait: Duration) -> SourcePoll {
            match self.events.pop_front() {
                Some(event) => SourcePoll::Event(event),
                None if self.close_when_empty => SourcePoll::Closed,
                None => {
                    std::thread::sleep(wait);
                    SourcePoll::Idle
                }
            }
        }
    }

    fn ad(instance: &str, ip: &str, model: &str) -> Advertisement {
        let mut txt = HashMap::new();
        txt.insert("rs".into(), "eSCL".into());
        txt.insert("ty".into(), model.into());
        txt.insert("is".into(), "platen,adf".into());
        txt.insert("duplex".into(), "T".into());
        Advertisement {
            fullname: format!("{instance}.{USCAN_SERVICE}"),
            hostname: format!("{instance}.local."),
            addresses: vec![ip.parse().unwrap()],
            port: 80,
            txt,
            tls: false,
        }
    }

    #[test]
    fn converts_advertisement() {
        let device = advertisement_to_device(&ad("office", "10.0.0.5", "Acme ScanJet")).unwrap();
        assert_eq!(device.id.as_str(), "office@office.local.");
        assert_eq!(device.base_url.as_str(), "http://10.0.0.5/eSCL/");
        assert_eq!(device.name, "Acme ScanJet");
        assert!(device.has_flatbed && device.has_feeder && device.has_duplex);
        assert!(!device.manually_added);
        assert!(device.formats.is_empty());
    }

    #[test]
    fn list_hints_are_split() {
        let mut advert = ad("office", "10.0.0.5", "Acme ScanJet");
        advert.txt.insert("cs".into(), "color, grayscale".into());
        advert.txt.insert("pdl".into(), "application/pdf,image/jpeg,".into());
        let device = advertisement_to_device(&advert).unwrap();
        assert_eq!(device.color_spaces, ["color", "grayscale"]);
        assert_eq!(device.formats, ["application/pdf", "image/jpeg"]);
    }

    #[test]
    fn ipv6_only_and_tls() {
        let mut advert = ad("lab", "fe80::1", "Lab Scanner");
        advert.tls = true;
        advert.port = 443;
        advert.txt.remove("rs");
        let device = advertisement_to_device(&advert).unwrap();
        assert_eq!(device.base_url.as_str(), "https://[fe80::1]/eSCL/");
        assert!(device.tls);
    }

    #[test]
    fn no_address_is_rejected() {
        let mut advert = ad("ghost", "10.0.0.9", "Ghost");
        advert.addresses.clear();
        assert!(advertisement_to_device(&advert).is_err());
    }

    #[test]
    fn instance_label_strips_service_type() {
        let mut advert = ad("Front Desk", "10.0.0.5", "x");
        assert_eq!(advert.instance(), "Front Desk");
        advert.txt.remove("ty");
        assert_eq!(advertisement_to_device(&advert).unwrap().name, "Front Desk");
    }

    #[test]
    fn re_advertisement_replaces_in_place() {
        let mut source = ScriptedSource::new(vec![
            AdvertisementEvent::Resolved(ad("a", "10.0.0.5", "First")),
            AdvertisementEvent::Resolved(ad("b", "10.0.0.6", "Second")),
            AdvertisementEvent::Resolved(ad("a", "10.0.0.7", "First v2")),
        ]);
        source.close_when_empty = true;
        let devices = collect_devices(
            &mut source,
            Duration::from_secs(5),
            Duration::from_millis(10),
            &CancellationToken::new(),
        )
        .unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].name, "First v2");
        assert_eq!(devices[0].base_url.as_str(), "http://10.0.0.7/eSCL/");
        assert_eq!(devices[1].name, "Second");
    }

    #[test]
    fn removal_drops_device() {
        let mut source = ScriptedSource::new(vec![
            AdvertisementEvent::Resolved(ad("a", "10.0.0.5", "A")),
            AdvertisementEvent::Resolved(ad("b", "10.0.0.6", "B")),
            AdvertisementEvent::Removed(format!("a.{USCAN_SERVICE}")),
        ]);
        source.close_when_empty = true;
        let devices = collect_devices(
            &mut source,
            Duration::from_secs(5),
            Duration::from_millis(10),
            &CancellationToken::new(),
        )
        .unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].name, "B");
    }

    fn secure(mut advert: Advertisement) -> Advertisement {
        advert.fullname = format!("{}.{USCANS_SERVICE}", advert.instance());
        advert.port = 443;
        advert.tls = true;
        advert
    }

    #[test]
    fn both_service_types_list_one_device() {
        let plain = ad("Acme", "10.0.0.5", "Acme ScanJet");
        let mut source = ScriptedSource::new(vec![
            AdvertisementEvent::Resolved(plain.clone()),
            AdvertisementEvent::Resolved(ad("b", "10.0.0.6", "Second")),
            AdvertisementEvent::Resolved(secure(plain)),
        ]);
        source.close_when_empty = true;
        let devices = collect_devices(
            &mut source,
            Duration::from_secs(5),
            Duration::from_millis(10),
            &CancellationToken::new(),
        )
        .unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].base_url.as_str(), "https://10.0.0.5/eSCL/");
        assert!(devices[0].tls);
        assert_eq!(devices[1].name, "Second");
    }

    #[test]
    fn losing_the_secure_service_falls_back_to_plain() {
        let plain = ad("Acme", "10.0.0.5", "Acme ScanJet");
        let mut source = ScriptedSource::new(vec![
            AdvertisementEvent::Resolved(secure(plain.clone())),
            AdvertisementEvent::Resolved(plain.clone()),
            AdvertisementEvent::Removed(format!("Acme.{USCANS_SERVICE}")),
        ]);
        source.close_when_empty = true;
        let devices = collect_devices(
            &mut source,
            Duration::from_secs(5),
            Duration::from_millis(10),
            &CancellationToken::new(),
        )
        .unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].base_url.as_str(), "http://10.0.0.5/eSCL/");

        let mut source = ScriptedSource::new(vec![
            AdvertisementEvent::Resolved(secure(plain.clone())),
            AdvertisementEvent::Resolved(plain),
            AdvertisementEvent::Removed(format!("Acme.{USCANS_SERVICE}")),
            AdvertisementEvent::Removed(format!("Acme.{USCAN_SERVICE}")),
        ]);
        source.close_when_empty = true;
        let devices = collect_devices(
            &mut source,
            Duration::from_secs(5),
            Duration::from_millis(10),
            &CancellationToken::new(),
        )
        .unwrap();
        assert!(devices.is_empty());
    }

    #[test]
    fn returns_within_timeout() {
        let mut source = ScriptedSource::new(vec![AdvertisementEvent::Resolved(ad(
            "a", "10.0.0.5", "A",
        ))]);
        let timeout = Duration::from_millis(200);
        let started = Instant::now();
        let devices = collect_devices(
            &mut source,
            timeout,
            Duration::from_millis(10),
            &CancellationToken::new(),
        )
        .unwrap();
        let elapsed = started.elapsed();
        assert_eq!(devices.len(), 1);
        assert!(elapsed >= timeout);
        assert!(elapsed < timeout + Duration::from_millis(500), "{elapsed:?}");
    }

    #[test]
    fn cancellation_is_reported() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut source = ScriptedSource::new(Vec::new());
        let result = collect_devices(
            &mut source,
            Duration::from_secs(5),
            Duration::from_millis(10),
            &cancel,
        );
        assert!(matches!(result, Err(ScanError::SearchCanceled)));
    }

    #[tokio::test]
    async fn cancel_mid_search_stops_promptly() {
        let registry = Arc::new(DeviceRegistry::new());
        let discovery = DeviceDiscovery::new(Arc::clone(&registry), &ClientConfig::default());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let result = discovery
            .discover_from(ScriptedSource::new(Vec::new()), Duration::from_secs(10), &cancel)
            .await;
        assert!(matches!(result, Err(ScanError::SearchCanceled)));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn successful_pass_is_published() {
        let registry = Arc::new(DeviceRegistry::new());
        let discovery = DeviceDiscovery::new(Arc::clone(&registry), &ClientConfig::default());
        let mut source = ScriptedSource::new(vec![AdvertisementEvent::Resolved(ad(
            "a", "10.0.0.5", "A",
        ))]);
        source.close_when_empty = true;
        let manual = discovery.add_manual("http://10.0.0.99/eSCL").unwrap();

        let devices = discovery
            .discover_from(source, Duration::from_secs(5), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(devices.len(), 2);
        assert!(registry.get(&manual.id).is_some());
    }
}
