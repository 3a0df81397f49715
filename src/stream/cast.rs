//! Network cast sinks
//!
//! - Chromecast: discovery and playback through the catt CLI
//! - DLNA: SSDP discovery plus UPnP AVTransport SOAP calls
//!
//! Both keep listening for devices after launch and play the stream on every
//! device they find. A device that refuses the stream is reported and
//! skipped; failing to run discovery at all is fatal.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::net::UdpSocket;
use tokio::process::Command;
use tokio::sync::mpsc;

use super::dispatch::{LaunchError, LaunchHandle, LaunchRequest, PlayerTarget, Sink, SinkEvent};
use super::player::PlayerError;

// =============================================================================
// Chromecast
// =============================================================================

/// Chromecast device as reported by `catt scan`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CastDevice {
    pub name: String,
    pub address: IpAddr,
    pub model: Option<String>,
}

impl CastDevice {
    /// Parse `catt scan` output ("IP - Name - Model" per line)
    pub fn parse_catt_scan(output: &str) -> Vec<CastDevice> {
        let mut devices = Vec::new();

        for line in output.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with("Scanning") || line.contains("No devices") {
                continue;
            }

            let parts: Vec<&str> = line.splitn(3, " - ").collect();
            if parts.len() < 2 {
                continue;
            }
            if let Ok(address) = parts[0].trim().parse::<IpAddr>() {
                devices.push(CastDevice {
                    name: parts[1].trim().to_string(),
                    address,
                    model: parts.get(2).map(|m| m.trim().to_string()),
                });
            }
        }

        devices
    }

    /// Whether a user-supplied name or address refers to this device
    pub fn matches(&self, wanted: &str) -> bool {
        self.name.eq_ignore_ascii_case(wanted) || self.address.to_string() == wanted
    }
}

pub struct ChromecastSink {
    target: PlayerTarget,
    catt_path: String,
    device: Option<String>,
    interval: Duration,
}

impl ChromecastSink {
    pub fn new(device: Option<String>, interval: Duration) -> Self {
        Self {
            target: PlayerTarget::Chromecast {
                device: device.clone(),
            },
            catt_path: "catt".to_string(),
            device,
            interval,
        }
    }

    /// Use a catt binary outside PATH
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.catt_path = path.into();
        self
    }
}

/// `catt` arguments that cast `request` to `device`
pub fn catt_cast_args(device: &str, request: &LaunchRequest) -> Vec<String> {
    let mut args = vec![
        "-d".to_string(),
        device.to_string(),
        "cast".to_string(),
        request.url.clone(),
    ];
    if let Some(subs) = &request.subtitles_url {
        args.push("-s".to_string());
        args.push(subs.clone());
    }
    args
}

async fn catt_scan(catt_path: &str) -> std::io::Result<Vec<CastDevice>> {
    let result = Command::new(catt_path).arg("scan").output().await?;
    let devices = CastDevice::parse_catt_scan(&String::from_utf8_lossy(&result.stdout));
    if devices.is_empty() {
        // catt sometimes reports devices on stderr
        return Ok(CastDevice::parse_catt_scan(&String::from_utf8_lossy(
            &result.stderr,
        )));
    }
    Ok(devices)
}

async fn catt_cast(catt_path: &str, device: &str, request: &LaunchRequest) -> Result<(), String> {
    let result = Command::new(catt_path)
        .args(catt_cast_args(device, request))
        .output()
        .await
        .map_err(|e| e.to_string())?;
    if result.status.success() {
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&result.stderr);
        Err(stderr.trim().to_string())
    }
}

fn report(events: &mpsc::UnboundedSender<SinkEvent>, device: String, outcome: Result<(), String>) {
    let event = match outcome {
        Ok(()) => {
            tracing::info!(%device, "casting");
            SinkEvent::DevicePlaying { device }
        }
        Err(reason) => {
            tracing::warn!(%device, %reason, "device refused stream");
            SinkEvent::DeviceFailed { device, reason }
        }
    };
    let _ = events.send(event);
}

#[async_trait]
impl Sink for ChromecastSink {
    fn target(&self) -> &PlayerTarget {
        &self.target
    }

    async fn launch(
        &self,
        request: LaunchRequest,
        events: mpsc::UnboundedSender<SinkEvent>,
    ) -> Result<LaunchHandle, LaunchError> {
        match Command::new(&self.catt_path).arg("--version").output().await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PlayerError::NotFound(self.catt_path.clone()).into());
            }
            Err(e) => return Err(PlayerError::StartFailed(e).into()),
        }

        let catt = self.catt_path.clone();
        let wanted = self.device.clone();
        let interval = self.interval;

        let task = tokio::spawn(async move {
            let mut seen = HashSet::new();
            loop {
                let devices = match catt_scan(&catt).await {
                    Ok(devices) => devices,
                    Err(e) => {
                        let _ = events.send(SinkEvent::Fatal(format!("Chromecast: {}", e)));
                        return;
                    }
                };
                for device in devices {
                    if let Some(wanted) = &wanted {
                        if !device.matches(wanted) {
                            continue;
                        }
                    }
                    if !seen.insert(device.address) {
                        continue;
                    }
                    let address = device.address.to_string();
                    let outcome = catt_cast(&catt, &address, &request).await;
                    report(&events, device.name, outcome);
                }
                tokio::time::sleep(interval).await;
            }
        });
        Ok(LaunchHandle::new(self.target.clone(), task))
    }
}

// =============================================================================
// DLNA
// =============================================================================

const SSDP_ADDR: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(239, 255, 255, 250)), 1900);
const AV_TRANSPORT: &str = "urn:schemas-upnp-org:service:AVTransport:1";
const SSDP_WINDOW: Duration = Duration::from_secs(3);

/// Media renderer found through SSDP
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DlnaRenderer {
    pub name: String,
    pub control_url: String,
}

fn search_request() -> String {
    format!(
        "M-SEARCH * HTTP/1.1\r\n\
HOST: 239.255.255.250:1900\r\n\
MAN: \"ssdp:discover\"\r\n\
MX: 2\r\n\
ST: {}\r\n\
\r\n",
        AV_TRANSPORT
    )
}

/// LOCATION header of an SSDP response
pub fn parse_location(response: &str) -> Option<String> {
    response.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        name.trim()
            .eq_ignore_ascii_case("location")
            .then(|| value.trim().to_string())
    })
}

fn extract_tag<'a>(text: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = text.find(&open)? + open.len();
    let end = text[start..].find(&close)? + start;
    Some(text[start..end].trim())
}

/// Friendly name and AVTransport control URL from a device description
pub fn parse_description(xml: &str, location: &str) -> Option<DlnaRenderer> {
    let name = extract_tag(xml, "friendlyName").unwrap_or("DLNA renderer").to_string();

    let service = xml
        .split("<service>")
        .skip(1)
        .find(|block| block.contains(AV_TRANSPORT))?;
    let control = extract_tag(service, "controlURL")?;
    let control_url = reqwest::Url::parse(location).ok()?.join(control).ok()?;

    Some(DlnaRenderer {
        name,
        control_url: control_url.to_string(),
    })
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// DIDL-Lite item describing the stream
pub fn didl_metadata(request: &LaunchRequest) -> String {
    let class = if request.content_type.starts_with("audio/") {
        "object.item.audioItem.musicTrack"
    } else if request.content_type.starts_with("image/") {
        "object.item.imageItem.photo"
    } else {
        "object.item.videoItem.movie"
    };

    let mut item = format!(
        "<DIDL-Lite xmlns=\"urn:schemas-upnp-org:metadata-1-0/DIDL-Lite/\" \
xmlns:dc=\"http://purl.org/dc/elements/1.1/\" \
xmlns:upnp=\"urn:schemas-upnp-org:metadata-1-0/upnp/\" \
xmlns:sec=\"http://www.sec.co.kr/\">\
<item id=\"0\" parentID=\"-1\" restricted=\"1\">\
<dc:title>{}</dc:title>\
<upnp:class>{}</upnp:class>\
<res protocolInfo=\"http-get:*:{}:*\">{}</res>",
        escape_xml(&request.title),
        class,
        escape_xml(&request.content_type),
        escape_xml(&request.url),
    );
    if let Some(subs) = &request.subtitles_url {
        let subs = escape_xml(subs);
        item.push_str(&format!(
            "<res protocolInfo=\"http-get:*:text/srt:*\">{}</res>\
<sec:CaptionInfoEx sec:type=\"srt\">{}</sec:CaptionInfoEx>",
            subs, subs
        ));
    }
    item.push_str("</item></DIDL-Lite>");
    item
}

fn soap_envelope(action: &str, arguments: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\
<s:Envelope xmlns:s=\"http://schemas.xmlsoap.org/soap/envelope/\" \
s:encodingStyle=\"http://schemas.xmlsoap.org/soap/encoding/\">\
<s:Body><u:{action} xmlns:u=\"{service}\">{arguments}</u:{action}></s:Body>\
</s:Envelope>",
        action = action,
        service = AV_TRANSPORT,
        arguments = arguments,
    )
}

async fn soap_call(
    client: &reqwest::Client,
    control_url: &str,
    action: &str,
    arguments: &str,
) -> Result<(), String> {
    let response = client
        .post(control_url)
        .header("Content-Type", "text/xml; charset=\"utf-8\"")
        .header("SOAPAction", format!("\"{}#{}\"", AV_TRANSPORT, action))
        .body(soap_envelope(action, arguments))
        .send()
        .await
        .map_err(|e| e.to_string())?;
    if !response.status().is_success() {
        return Err(format!("{} returned HTTP {}", action, response.status()));
    }
    Ok(())
}

/// Load the stream on a renderer and start playback
pub async fn play_on(
    client: &reqwest::Client,
    renderer: &DlnaRenderer,
    request: &LaunchRequest,
) -> Result<(), String> {
    let set_uri = format!(
        "<InstanceID>0</InstanceID><CurrentURI>{}</CurrentURI>\
<CurrentURIMetaData>{}</CurrentURIMetaData>",
        escape_xml(&request.url),
        escape_xml(&didl_metadata(request)),
    );
    soap_call(client, &renderer.control_url, "SetAVTransportURI", &set_uri).await?;
    soap_call(
        client,
        &renderer.control_url,
        "Play",
        "<InstanceID>0</InstanceID><Speed>1</Speed>",
    )
    .await
}

async fn describe(client: &reqwest::Client, location: &str) -> Result<DlnaRenderer, String> {
    let xml = client
        .get(location)
        .send()
        .await
        .map_err(|e| e.to_string())?
        .text()
        .await
        .map_err(|e| e.to_string())?;
    parse_description(&xml, location).ok_or_else(|| "no AVTransport service".to_string())
}

/// Collect LOCATION headers answering one M-SEARCH
async fn ssdp_search(socket: &UdpSocket) -> std::io::Result<Vec<String>> {
    socket.send_to(search_request().as_bytes(), SSDP_ADDR).await?;
    let mut locations = Vec::new();
    let mut buf = [0u8; 2048];
    let deadline = tokio::time::Instant::now() + SSDP_WINDOW;
    while let Ok(received) = tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await {
        let (n, _) = received?;
        if let Some(location) = parse_location(&String::from_utf8_lossy(&buf[..n])) {
            if !locations.contains(&location) {
                locations.push(location);
            }
        }
    }
    Ok(locations)
}

pub struct DlnaSink {
    target: PlayerTarget,
    interval: Duration,
}

impl DlnaSink {
    pub fn new(interval: Duration) -> Self {
        Self {
            target: PlayerTarget::Dlna,
            interval,
        }
    }
}

#[async_trait]
impl Sink for DlnaSink {
    fn target(&self) -> &PlayerTarget {
        &self.target
    }

    async fn launch(
        &self,
        request: LaunchRequest,
        events: mpsc::UnboundedSender<SinkEvent>,
    ) -> Result<LaunchHandle, LaunchError> {
        let socket = UdpSocket::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)))
            .await
            .map_err(|e| LaunchError::Discovery {
                target: "DLNA",
                reason: e.to_string(),
            })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        let interval = self.interval;

        let task = tokio::spawn(async move {
            let mut seen = HashSet::new();
            loop {
                let locations = match ssdp_search(&socket).await {
                    Ok(locations) => locations,
                    Err(e) => {
                        let _ = events.send(SinkEvent::Fatal(format!("DLNA: {}", e)));
                        return;
                    }
                };
                for location in locations {
                    if !seen.insert(location.clone()) {
                        continue;
                    }
                    match describe(&client, &location).await {
                        Ok(renderer) => {
                            let outcome = play_on(&client, &renderer, &request).await;
                            report(&events, renderer.name, outcome);
                        }
                        Err(reason) => report(&events, location, Err(reason)),
                    }
                }
                tokio::time::sleep(interval).await;
            }
        });
        Ok(LaunchHandle::new(self.target.clone(), task))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TorrentFile;
    use std::path::PathBuf;

    fn request(subs: Option<&str>) -> LaunchRequest {
        LaunchRequest {
            url: "http://192.168.1.10:8000/0".into(),
            title: "swarmcast - Tom & Jerry.mp4".into(),
            file: TorrentFile {
                index: 0,
                name: "Tom & Jerry.mp4".into(),
                path: PathBuf::from("Tom & Jerry.mp4"),
                length: 1000,
                offset: 0,
            },
            content_type: "video/mp4".into(),
            subtitles_path: None,
            subtitles_url: subs.map(String::from),
        }
    }

    #[test]
    fn test_parse_catt_scan_output() {
        let output = "Scanning Chromecasts...\n192.168.1.50 - Living Room TV - Google Inc. Chromecast Ultra\n192.168.1.51 - Bedroom - Google Inc. Chromecast\n";
        let devices = CastDevice::parse_catt_scan(output);

        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].name, "Living Room TV");
        assert_eq!(devices[0].address.to_string(), "192.168.1.50");
        assert_eq!(devices[0].model.as_deref(), Some("Google Inc. Chromecast Ultra"));
        assert!(devices[1].matches("bedroom"));
        assert!(devices[1].matches("192.168.1.51"));
    }

    #[test]
    fn test_parse_catt_scan_no_devices() {
        let devices = CastDevice::parse_catt_scan("Scanning...\nNo devices found\n");
        assert!(devices.is_empty());
    }

    #[test]
    fn test_catt_cast_args_with_subtitles() {
        let args = catt_cast_args("192.168.1.50", &request(Some("http://h:1/a.vtt")));
        assert_eq!(
            args,
            vec![
                "-d",
                "192.168.1.50",
                "cast",
                "http://192.168.1.10:8000/0",
                "-s",
                "http://h:1/a.vtt"
            ]
        );
    }

    #[test]
    fn test_parse_location_is_case_insensitive() {
        let response = "HTTP/1.1 200 OK\r\nCACHE-CONTROL: max-age=1800\r\nLocation: http://192.168.1.30:49152/description.xml\r\n\r\n";
        assert_eq!(
            parse_location(response).as_deref(),
            Some("http://192.168.1.30:49152/description.xml")
        );
        assert_eq!(parse_location("HTTP/1.1 200 OK\r\n\r\n"), None);
    }

    #[test]
    fn test_parse_description_resolves_relative_control_url() {
        let xml = "<root><device><friendlyName>Kitchen TV</friendlyName><serviceList>\
<service><serviceType>urn:schemas-upnp-org:service:RenderingControl:1</serviceType>\
<controlURL>/rc</controlURL></service>\
<service><serviceType>urn:schemas-upnp-org:service:AVTransport:1</serviceType>\
<controlURL>/upnp/control/AVTransport1</controlURL></service>\
</serviceList></device></root>";
        let renderer = parse_description(xml, "http://192.168.1.30:49152/description.xml").unwrap();
        assert_eq!(renderer.name, "Kitchen TV");
        assert_eq!(
            renderer.control_url,
            "http://192.168.1.30:49152/upnp/control/AVTransport1"
        );
    }

    #[test]
    fn test_parse_description_without_transport() {
        let xml = "<root><service><serviceType>urn:other</serviceType><controlURL>/x</controlURL></service></root>";
        assert_eq!(parse_description(xml, "http://a/"), None);
    }

    #[test]
    fn test_didl_escapes_and_lists_subtitles() {
        let didl = didl_metadata(&request(Some("http://192.168.1.10:9000/a.srt")));
        assert!(didl.contains("<dc:title>swarmcast - Tom &amp; Jerry.mp4</dc:title>"));
        assert!(didl.contains("object.item.videoItem.movie"));
        assert!(didl.contains("http-get:*:video/mp4:*"));
        assert!(didl.contains("<sec:CaptionInfoEx sec:type=\"srt\">http://192.168.1.10:9000/a.srt"));

        let plain = didl_metadata(&request(None));
        assert!(!plain.contains("CaptionInfoEx"));
    }

    #[tokio::test]
    async fn test_play_on_sends_set_uri_then_play() {
        let mut server = mockito::Server::new_async().await;
        let set_uri = server
            .mock("POST", "/control")
            .match_header(
                "soapaction",
                "\"urn:schemas-upnp-org:service:AVTransport:1#SetAVTransportURI\"",
            )
            .match_body(mockito::Matcher::Regex(
                "<CurrentURI>http://192.168.1.10:8000/0</CurrentURI>".into(),
            ))
            .with_status(200)
            .create_async()
            .await;
        let play = server
            .mock("POST", "/control")
            .match_header(
                "soapaction",
                "\"urn:schemas-upnp-org:service:AVTransport:1#Play\"",
            )
            .with_status(200)
            .create_async()
            .await;

        let renderer = DlnaRenderer {
            name: "TV".into(),
            control_url: format!("{}/control", server.url()),
        };
        play_on(&reqwest::Client::new(), &renderer, &request(None))
            .await
            .unwrap();
        set_uri.assert_async().await;
        play.assert_async().await;
    }

    #[tokio::test]
    async fn test_play_on_reports_renderer_errors() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/control")
            .with_status(500)
            .create_async()
            .await;
        let renderer = DlnaRenderer {
            name: "TV".into(),
            control_url: format!("{}/control", server.url()),
        };
        let err = play_on(&reqwest::Client::new(), &renderer, &request(None))
            .await
            .unwrap_err();
        assert!(err.contains("SetAVTransportURI"));
    }

    #[tokio::test]
    async fn test_missing_catt_is_launch_error() {
        let sink = ChromecastSink::new(None, Duration::from_secs(1))
            .with_path("swarmcast-test-no-such-catt");
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = sink.launch(request(None), tx).await.unwrap_err();
        assert!(matches!(err, LaunchError::Player(PlayerError::NotFound(_))));
    }
}
