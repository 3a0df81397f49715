//! Peer blocklist
//!
//! Accepts a file path or an http(s) URL. One rule per line:
//! single address, `start-end` range, CIDR block, or P2P style
//! `description:start-end`. `#` starts a comment.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::Path;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BlocklistError {
    #[error("failed to read blocklist: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to download blocklist: {0}")]
    Fetch(#[from] reqwest::Error),
    #[error("blocklist line {line}: {reason}")]
    Rule { line: usize, reason: String },
}

#[derive(Debug, Default, Clone)]
pub struct Blocklist {
    v4: Vec<(u32, u32)>,
    v6: Vec<(u128, u128)>,
}

impl Blocklist {
    /// Load from a path or URL
    pub async fn load(source: &str) -> Result<Self, BlocklistError> {
        if source.starts_with("http://") || source.starts_with("https://") {
            let text = reqwest::get(source).await?.error_for_status()?.text().await?;
            Self::parse(&text)
        } else {
            Self::from_file(Path::new(source)).await
        }
    }

    pub async fn from_file(path: &Path) -> Result<Self, BlocklistError> {
        let text = tokio::fs::read_to_string(path).await?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, BlocklistError> {
        let mut list = Self::default();
        for (line_no, raw) in text.lines().enumerate() {
            let line = raw.split_once('#').map(|(left, _)| left).unwrap_or(raw);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            list.add_rule(strip_description(line))
                .map_err(|reason| BlocklistError::Rule {
                    line: line_no + 1,
                    reason,
                })?;
        }
        Ok(list)
    }

    pub fn contains(&self, addr: IpAddr) -> bool {
        match addr {
            IpAddr::V4(ip) => {
                let value = u32::from(ip);
                self.v4.iter().any(|(s, e)| value >= *s && value <= *e)
            }
            IpAddr::V6(ip) => {
                let value = u128::from(ip);
                self.v6.iter().any(|(s, e)| value >= *s && value <= *e)
            }
        }
    }

    /// Number of rules
    pub fn len(&self) -> usize {
        self.v4.len() + self.v6.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn add_rule(&mut self, rule: &str) -> Result<(), String> {
        if let Some((start, end)) = rule.split_once('-') {
            let start = IpAddr::from_str(start.trim()).map_err(|_| "invalid start ip")?;
            let end = IpAddr::from_str(end.trim()).map_err(|_| "invalid end ip")?;
            match (start, end) {
                (IpAddr::V4(s), IpAddr::V4(e)) => self.v4.push(ordered(u32::from(s), u32::from(e))),
                (IpAddr::V6(s), IpAddr::V6(e)) => {
                    self.v6.push(ordered(u128::from(s), u128::from(e)))
                }
                _ => return Err("mixed ip versions".to_string()),
            }
        } else if let Some((base, prefix)) = rule.split_once('/') {
            let base = IpAddr::from_str(base.trim()).map_err(|_| "invalid cidr ip")?;
            let prefix = prefix
                .trim()
                .parse::<u8>()
                .map_err(|_| "invalid cidr prefix")?;
            match base {
                IpAddr::V4(ip) => self.v4.push(cidr_v4(ip, prefix)?),
                IpAddr::V6(ip) => self.v6.push(cidr_v6(ip, prefix)?),
            }
        } else {
            match IpAddr::from_str(rule).map_err(|_| "invalid ip")? {
                IpAddr::V4(ip) => {
                    let v = u32::from(ip);
                    self.v4.push((v, v));
                }
                IpAddr::V6(ip) => {
                    let v = u128::from(ip);
                    self.v6.push((v, v));
                }
            }
        }
        Ok(())
    }
}

/// `Some Org:1.2.3.0-1.2.3.255` -> `1.2.3.0-1.2.3.255`
fn strip_description(line: &str) -> &str {
    if let Some(idx) = line.rfind(':') {
        let tail = &line[idx + 1..];
        if tail.contains('-')
            && tail
                .split('-')
                .all(|part| part.trim().parse::<Ipv4Addr>().is_ok())
        {
            return tail;
        }
    }
    line
}

fn ordered<T: Ord>(a: T, b: T) -> (T, T) {
    if a > b {
        (b, a)
    } else {
        (a, b)
    }
}

fn cidr_v4(ip: Ipv4Addr, prefix: u8) -> Result<(u32, u32), String> {
    if prefix > 32 {
        return Err("cidr prefix out of range".to_string());
    }
    let mask = if prefix == 0 { 0 } else { !0u32 << (32 - prefix) };
    let start = u32::from(ip) & mask;
    Ok((start, start | !mask))
}

fn cidr_v6(ip: Ipv6Addr, prefix: u8) -> Result<(u128, u128), String> {
    if prefix > 128 {
        return Err("cidr prefix out of range".to_string());
    }
    let mask = if prefix == 0 { 0 } else { !0u128 << (128 - prefix) };
    let start = u128::from(ip) & mask;
    Ok((start, start | !mask))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v4(a: u8, b: u8, c: u8, d: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(a, b, c, d))
    }

    #[test]
    fn test_rules_of_every_shape() {
        let list = Blocklist::parse(
            "10.0.0.1\n10.0.0.10 - 10.0.0.4\n192.168.1.0/24\n2001:db8::/32\n",
        )
        .unwrap();
        assert_eq!(list.len(), 4);
        assert!(list.contains(v4(10, 0, 0, 1)));
        assert!(list.contains(v4(10, 0, 0, 7)));
        assert!(list.contains(v4(192, 168, 1, 200)));
        assert!(list.contains("2001:db8::1".parse().unwrap()));
        assert!(!list.contains(v4(172, 16, 0, 1)));
    }

    #[test]
    fn test_p2p_format_and_comments() {
        let list = Blocklist::parse(
            "# header\nBad Corp:1.2.3.0-1.2.3.255\n\n8.8.8.8 # inline\n",
        )
        .unwrap();
        assert!(list.contains(v4(1, 2, 3, 77)));
        assert!(list.contains(v4(8, 8, 8, 8)));
        assert!(!list.contains(v4(1, 2, 4, 0)));
    }

    #[test]
    fn test_errors_carry_line_numbers() {
        let err = Blocklist::parse("10.0.0.1\nnot-an-ip\n").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_cidr_prefix_bounds() {
        assert!(cidr_v4(Ipv4Addr::new(1, 2, 3, 4), 32).is_ok());
        assert!(cidr_v4(Ipv4Addr::new(1, 2, 3, 4), 33).is_err());
        assert!(cidr_v6("2001:db8::1".parse().unwrap(), 129).is_err());
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blocklist.txt");
        std::fs::write(&path, "10.0.0.0/8\n").unwrap();
        let list = Blocklist::load(path.to_str().unwrap()).await.unwrap();
        assert!(list.contains(v4(10, 9, 8, 7)));
    }
}
