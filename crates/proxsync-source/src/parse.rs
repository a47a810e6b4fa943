// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Conversion of raw Proxmox VE API payloads into typed snapshots.
//!
//! Guest configs and node listings arrive as flat JSON objects whose values are
//! Proxmox property strings (`key=value,key=value`). Everything here is pure.
//! A key that is absent yields `None`; a key present with the wrong shape is a
//! [`SourceError::MalformedData`] so a broken payload never silently turns into
//! a half-empty snapshot.

use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::LazyLock;

use ipnetwork::IpNetwork;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::{Result, SourceError};
use crate::types::{
    DiskSpec, HostInterfaceKind, HostInterfaceSpec, InstanceKind, InstanceStatus, KindDetails,
    NetworkInterfaceSpec, SourceInstance, SourceNode,
};

const MIB: u64 = 1024 * 1024;

/// NIC models QEMU accepts as the leading `model=MAC` pair of a `netN` value.
pub const QEMU_NIC_MODELS: &[&str] = &[
    "virtio", "e1000", "e1000e", "rtl8139", "vmxnet3", "i82551", "i82557b", "i82559er", "pcnet",
    "ne2k_pci", "ne2k_isa",
];

static SIZE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(\d+\.?\d*)\s*([KMGT])?B?").expect("SIZE_RE is a valid regex pattern")
});

static VM_DISK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(ide|sata|scsi|virtio)(\d+)$").expect("VM_DISK_RE is a valid regex pattern")
});

static CT_MOUNT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^mp(\d+)$").expect("CT_MOUNT_RE is a valid regex pattern"));

static NET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^net(\d+)$").expect("NET_RE is a valid regex pattern"));

static MAC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9A-Fa-f]{2}(:[0-9A-Fa-f]{2}){5}$").expect("MAC_RE is a valid regex pattern")
});

// ============================================================================
// Scalar helpers
// ============================================================================

/// Parse a Proxmox size (`32G`, `512M`, `1.5T`, `100K`) into whole megabytes.
///
/// A bare number is taken as gigabytes.
pub fn parse_size_to_mb(raw: &str) -> Option<u64> {
    let caps = SIZE_RE.captures(raw)?;
    let value: f64 = caps.get(1)?.as_str().parse().ok()?;
    let unit = caps
        .get(2)
        .map(|m| m.as_str().to_ascii_uppercase())
        .unwrap_or_else(|| "G".to_string());
    let mb = match unit.as_str() {
        "T" => value * 1024.0 * 1024.0,
        "G" => value * 1024.0,
        "M" => value,
        "K" => value / 1024.0,
        _ => return None,
    };
    Some(mb as u64)
}

/// Infer the image format from a volume name.
pub fn disk_format(volume: &str) -> Option<String> {
    let lower = volume.to_lowercase();
    let format = if lower.ends_with(".tar.gz") {
        "tar.gz"
    } else if lower.ends_with(".tar.zst") {
        "tar.zst"
    } else if lower.ends_with(".qcow2") {
        "qcow2"
    } else if lower.ends_with(".raw") || lower.ends_with(".img") {
        "raw"
    } else if lower.ends_with(".vmdk") {
        "vmdk"
    } else if lower.ends_with(".iso") {
        "iso"
    } else if lower.ends_with(".tar") {
        "tar"
    } else {
        return None;
    };
    Some(format.to_string())
}

/// Split a tag list (`prod;web`, `prod,web`, `prod web`) into a set.
pub fn parse_tags(raw: &str) -> BTreeSet<String> {
    raw.split([';', ',', ' '])
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Upper-case a MAC address, rejecting anything that is not six hex octets.
pub fn normalize_mac(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    MAC_RE
        .is_match(trimmed)
        .then(|| trimmed.to_ascii_uppercase())
}

/// Split a property string into `(key, value)` pairs. Bare parts have no value.
fn properties(raw: &str) -> Vec<(String, Option<String>)> {
    raw.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|part| match part.split_once('=') {
            Some((k, v)) => (k.trim().to_string(), Some(v.trim().to_string())),
            None => (part.to_string(), None),
        })
        .collect()
}

fn prop<'p>(props: &'p [(String, Option<String>)], key: &str) -> Option<&'p str> {
    props
        .iter()
        .find(|(k, v)| k == key && v.is_some())
        .and_then(|(_, v)| v.as_deref())
}

fn bare(props: &[(String, Option<String>)]) -> Option<&str> {
    props
        .iter()
        .find(|(_, v)| v.is_none())
        .map(|(k, _)| k.as_str())
}

/// `storage:volume` -> (storage, volume). Storage `none` means "no storage".
fn split_volume(spec: &str) -> (Option<String>, String) {
    match spec.split_once(':') {
        Some((storage, volume)) if storage != "none" => {
            (Some(storage.to_string()), volume.to_string())
        }
        Some((_, volume)) => (None, volume.to_string()),
        None => (None, spec.to_string()),
    }
}

// ============================================================================
// Typed field access
// ============================================================================

/// Typed, fail-fast view over one JSON object.
pub(crate) struct Fields<'a> {
    context: String,
    map: &'a Map<String, Value>,
}

impl<'a> Fields<'a> {
    pub(crate) fn new(context: impl Into<String>, map: &'a Map<String, Value>) -> Self {
        Self {
            context: context.into(),
            map,
        }
    }

    fn keys(&self) -> impl Iterator<Item = &'a String> {
        self.map.keys()
    }

    fn wrong(&self, key: &str, expected: &str, got: &Value) -> SourceError {
        SourceError::malformed(
            format!("{}.{}", self.context, key),
            format!("expected {expected}, got {got}"),
        )
    }

    pub(crate) fn string(&self, key: &str) -> Result<Option<String>> {
        match self.map.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(Value::Number(n)) => Ok(Some(n.to_string())),
            Some(other) => Err(self.wrong(key, "a string", other)),
        }
    }

    /// Non-empty, trimmed string.
    fn text(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .string(key)?
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()))
    }

    pub(crate) fn u64(&self, key: &str) -> Result<Option<u64>> {
        match self.map.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(v @ Value::Number(n)) => n
                .as_u64()
                .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
                .map(Some)
                .ok_or_else(|| self.wrong(key, "an unsigned number", v)),
            Some(v @ Value::String(s)) => s
                .trim()
                .parse::<u64>()
                .map(Some)
                .map_err(|_| self.wrong(key, "an unsigned number", v)),
            Some(other) => Err(self.wrong(key, "an unsigned number", other)),
        }
    }

    pub(crate) fn u32(&self, key: &str) -> Result<Option<u32>> {
        match self.u64(key)? {
            None => Ok(None),
            Some(n) => u32::try_from(n)
                .map(Some)
                .map_err(|_| self.wrong(key, "a 32-bit number", &Value::from(n))),
        }
    }

    pub(crate) fn flag(&self, key: &str) -> Result<Option<bool>> {
        match self.map.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(Value::Number(n)) => Ok(Some(n.as_f64().unwrap_or(0.0) != 0.0)),
            Some(v @ Value::String(s)) => match s.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(Some(true)),
                "0" | "false" | "no" | "off" => Ok(Some(false)),
                _ => Err(self.wrong(key, "a boolean", v)),
            },
            Some(other) => Err(self.wrong(key, "a boolean", other)),
        }
    }

    fn object(&self, key: &str) -> Result<Option<Fields<'a>>> {
        match self.map.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Object(inner)) => {
                Ok(Some(Fields::new(format!("{}.{}", self.context, key), inner)))
            }
            Some(other) => Err(self.wrong(key, "an object", other)),
        }
    }

    fn malformed(&self, key: &str, reason: impl Into<String>) -> SourceError {
        SourceError::malformed(format!("{}.{}", self.context, key), reason)
    }
}

// ============================================================================
// Guest disks
// ============================================================================

/// Disk slots the VM boots from, in preference order.
fn vm_boot_candidates(cfg: &Fields<'_>) -> Result<Vec<String>> {
    let mut out = Vec::new();
    if let Some(boot) = cfg.text("boot")? {
        let props = properties(&boot);
        if let Some(order) = prop(&props, "order") {
            out.extend(
                order
                    .split(';')
                    .map(str::trim)
                    .filter(|e| !e.is_empty() && !e.starts_with("net"))
                    .map(str::to_string),
            );
        } else if VM_DISK_RE.is_match(boot.trim()) {
            out.push(boot.trim().to_string());
        }
    }
    if let Some(bootdisk) = cfg.text("bootdisk")? {
        out.push(bootdisk);
    }
    Ok(out)
}

fn mark_boot_and_sort(disks: &mut [DiskSpec], candidates: &[String]) {
    if let Some(name) = candidates
        .iter()
        .find(|c| disks.iter().any(|d| &d.name == *c))
    {
        for disk in disks.iter_mut() {
            disk.boot = &disk.name == name;
        }
    }
    disks.sort_by(|a, b| b.boot.cmp(&a.boot).then_with(|| a.name.cmp(&b.name)));
}

fn parse_vm_disks(cfg: &Fields<'_>) -> Result<Vec<DiskSpec>> {
    let mut disks = Vec::new();
    for key in cfg.keys() {
        if !VM_DISK_RE.is_match(key) {
            continue;
        }
        let Some(raw) = cfg.text(key)? else { continue };
        let props = properties(&raw);
        if prop(&props, "media") == Some("cdrom") {
            continue;
        }
        let Some(spec) = prop(&props, "file").or_else(|| bare(&props)) else {
            return Err(cfg.malformed(key, "missing volume"));
        };
        let (storage, volume) = split_volume(spec);
        if storage.is_none() && volume == "none" {
            continue;
        }
        disks.push(DiskSpec {
            name: key.clone(),
            size_mb: prop(&props, "size").and_then(parse_size_to_mb),
            format: disk_format(&volume).or_else(|| prop(&props, "format").map(str::to_string)),
            storage,
            volume: Some(volume),
            boot: false,
            mount_point: None,
        });
    }
    let candidates = vm_boot_candidates(cfg)?;
    mark_boot_and_sort(&mut disks, &candidates);
    Ok(disks)
}

/// Container volumes carry no extension, but their well-known names are raw images.
fn container_default_format(volume: &str) -> Option<String> {
    let named_image = volume.contains("subvol-")
        || (volume.contains("vm-") && volume.contains("-disk-"));
    (!volume.contains('.') && named_image).then(|| "raw".to_string())
}

fn container_disk(cfg: &Fields<'_>, key: &str, raw: &str) -> Result<DiskSpec> {
    let props = properties(raw);
    let Some(spec) = prop(&props, "volume").or_else(|| bare(&props)) else {
        return Err(cfg.malformed(key, "missing volume"));
    };
    let (storage, volume) = split_volume(spec);
    let is_root = key == "rootfs";
    Ok(DiskSpec {
        name: key.to_string(),
        size_mb: prop(&props, "size").and_then(parse_size_to_mb),
        format: disk_format(&volume).or_else(|| container_default_format(&volume)),
        storage,
        volume: Some(volume),
        boot: is_root,
        mount_point: if is_root {
            Some("/".to_string())
        } else {
            prop(&props, "mp").map(str::to_string)
        },
    })
}

fn parse_container_disks(cfg: &Fields<'_>) -> Result<Vec<DiskSpec>> {
    let mut disks = Vec::new();
    for key in cfg.keys() {
        if key != "rootfs" && !CT_MOUNT_RE.is_match(key) {
            continue;
        }
        if let Some(raw) = cfg.text(key)? {
            disks.push(container_disk(cfg, key, &raw)?);
        }
    }
    disks.sort_by(|a, b| b.boot.cmp(&a.boot).then_with(|| a.name.cmp(&b.name)));
    Ok(disks)
}

// ============================================================================
// Guest NICs
// ============================================================================

fn static_address(cfg: &Fields<'_>, key: &str, value: Option<&str>) -> Result<Option<IpNetwork>> {
    let Some(value) = value.map(str::trim) else {
        return Ok(None);
    };
    if !value.contains('/') || matches!(value, "dhcp" | "auto" | "manual") {
        return Ok(None);
    }
    value
        .parse::<IpNetwork>()
        .map(Some)
        .map_err(|e| cfg.malformed(key, format!("invalid address '{value}': {e}")))
}

fn parse_nics(kind: InstanceKind, cfg: &Fields<'_>) -> Result<Vec<NetworkInterfaceSpec>> {
    let mut nics = Vec::new();
    for key in cfg.keys() {
        let Some(caps) = NET_RE.captures(key) else {
            continue;
        };
        let index: u32 = caps[1]
            .parse()
            .map_err(|_| cfg.malformed(key, "interface index out of range"))?;
        let Some(raw) = cfg.text(key)? else { continue };
        let props = properties(&raw);

        let (model, mac) = match kind {
            InstanceKind::Vm => {
                let leading = props
                    .iter()
                    .find(|(k, _)| QEMU_NIC_MODELS.contains(&k.as_str()));
                let model = leading
                    .map(|(k, _)| k.clone())
                    .or_else(|| prop(&props, "model").map(str::to_string));
                let mac = leading
                    .and_then(|(_, v)| v.clone())
                    .or_else(|| prop(&props, "macaddr").map(str::to_string));
                (model, mac)
            }
            InstanceKind::Container => (
                Some("veth".to_string()),
                prop(&props, "hwaddr").map(str::to_string),
            ),
        };

        let Some(mac) = mac.as_deref().and_then(normalize_mac) else {
            warn!(interface = %key, "skipping interface without a usable MAC address");
            continue;
        };

        let vlan_tag = match prop(&props, "tag") {
            None => None,
            Some(t) => Some(
                t.parse::<u16>()
                    .map_err(|_| cfg.malformed(key, format!("invalid VLAN tag '{t}'")))?,
            ),
        };

        let mut static_addresses = Vec::new();
        match kind {
            InstanceKind::Container => {
                for family in ["ip", "ip6"] {
                    static_addresses.extend(static_address(cfg, key, prop(&props, family))?);
                }
            }
            InstanceKind::Vm => {
                let ipconfig_key = format!("ipconfig{index}");
                if let Some(ipconfig) = cfg.text(&ipconfig_key)? {
                    let ip_props = properties(&ipconfig);
                    for family in ["ip", "ip6"] {
                        static_addresses.extend(static_address(
                            cfg,
                            &ipconfig_key,
                            prop(&ip_props, family),
                        )?);
                    }
                }
            }
        }

        nics.push(NetworkInterfaceSpec {
            index,
            mac,
            bridge: prop(&props, "bridge").map(str::to_string),
            vlan_tag,
            model,
            static_addresses,
            guest_addresses: Vec::new(),
            guest_name: prop(&props, "name").map(str::to_string),
        });
    }
    nics.sort_by_key(|n| n.index);
    Ok(nics)
}

/// One interface as reported by the QEMU guest agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestInterface {
    pub name: String,
    pub mac: Option<String>,
    pub addresses: Vec<IpNetwork>,
}

/// Parse `agent/network-get-interfaces`.
///
/// The agent payload is produced by software inside the guest, so entries that
/// do not parse are dropped instead of failing the snapshot.
pub fn parse_agent_interfaces(value: &Value) -> Vec<GuestInterface> {
    let entries = match value {
        Value::Array(list) => list.as_slice(),
        Value::Object(obj) => obj
            .get("result")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default(),
        _ => &[],
    };

    entries
        .iter()
        .filter_map(|entry| {
            let name = entry.get("name")?.as_str()?.to_string();
            if name == "lo" {
                return None;
            }
            let mac = entry
                .get("hardware-address")
                .and_then(Value::as_str)
                .and_then(normalize_mac);
            let addresses = entry
                .get("ip-addresses")
                .and_then(Value::as_array)
                .map(|addrs| {
                    addrs
                        .iter()
                        .filter_map(|a| {
                            let ip: IpAddr = a.get("ip-address")?.as_str()?.parse().ok()?;
                            let prefix = a.get("prefix")?.as_u64()?;
                            IpNetwork::new(ip, u8::try_from(prefix).ok()?).ok()
                        })
                        .collect()
                })
                .unwrap_or_default();
            Some(GuestInterface {
                name,
                mac,
                addresses,
            })
        })
        .collect()
}

/// Copy agent-reported addresses onto the NICs with the same MAC.
pub fn attach_guest_addresses(nics: &mut [NetworkInterfaceSpec], guest: &[GuestInterface]) {
    for nic in nics.iter_mut() {
        if let Some(found) = guest
            .iter()
            .find(|g| g.mac.as_deref() == Some(nic.mac.as_str()))
        {
            nic.guest_addresses = found.addresses.clone();
            if nic.guest_name.is_none() {
                nic.guest_name = Some(found.name.clone());
            }
        }
    }
}

// ============================================================================
// Guests
// ============================================================================

fn memory_mb(cfg: &Fields<'_>) -> Result<Option<u64>> {
    let Some(raw) = cfg.text("memory")? else {
        return Ok(None);
    };
    let props = properties(&raw);
    let value = prop(&props, "current").or_else(|| bare(&props)).unwrap_or("");
    value
        .parse::<u64>()
        .map(Some)
        .map_err(|_| cfg.malformed("memory", format!("invalid memory '{raw}'")))
}

fn leading_value(raw: Option<String>, key: &str) -> Option<String> {
    let raw = raw?;
    let props = properties(&raw);
    prop(&props, key)
        .or_else(|| bare(&props))
        .map(str::to_string)
}

/// Build a [`SourceInstance`] from a list entry and the guest's config.
pub(crate) fn parse_instance(
    kind: InstanceKind,
    summary: &Map<String, Value>,
    config: &Map<String, Value>,
) -> Result<SourceInstance> {
    let s = Fields::new(format!("{} list entry", kind.api_segment()), summary);
    let vmid = s
        .u32("vmid")?
        .ok_or_else(|| s.malformed("vmid", "missing guest id"))?;
    let cfg = Fields::new(format!("{}/{} config", kind.api_segment(), vmid), config);

    let name_key = match kind {
        InstanceKind::Vm => "name",
        InstanceKind::Container => "hostname",
    };
    let name = match cfg.text(name_key)? {
        Some(n) => n,
        None => s
            .text("name")?
            .unwrap_or_else(|| format!("{}-{}", kind, vmid)),
    };

    let status = s
        .text("status")?
        .map(|v| InstanceStatus::from(v.as_str()))
        .unwrap_or_else(|| InstanceStatus::Other("unknown".to_string()));

    let memory_mb = match memory_mb(&cfg)? {
        Some(mb) => Some(mb),
        None => s.u64("maxmem")?.map(|bytes| bytes / MIB),
    };

    let tags = match cfg.text("tags")? {
        Some(t) => parse_tags(&t),
        None => s.text("tags")?.map(|t| parse_tags(&t)).unwrap_or_default(),
    };

    let (vcpus, min_memory_mb, cpu_sockets, disks, details) = match kind {
        InstanceKind::Vm => {
            let sockets = cfg.u32("sockets")?;
            let cores = cfg.u32("cores")?;
            let vcpus = match cfg.u32("vcpus")? {
                Some(v) => v,
                None => cores.unwrap_or(1) * sockets.unwrap_or(1),
            };
            let boot_order = cfg.text("boot")?.map(|b| {
                let props = properties(&b);
                prop(&props, "order").map(str::to_string).unwrap_or(b)
            });
            let details = KindDetails::Vm {
                ostype: cfg.text("ostype")?,
                bios: cfg.text("bios")?,
                machine: leading_value(cfg.text("machine")?, "type"),
                cpu_type: leading_value(cfg.text("cpu")?, "cputype"),
                cores_per_socket: cores,
                numa: cfg.flag("numa")?,
                boot_order,
            };
            let min_memory = cfg.u64("balloon")?.filter(|b| *b > 0);
            (vcpus, min_memory, sockets, parse_vm_disks(&cfg)?, details)
        }
        InstanceKind::Container => {
            let vcpus = match cfg.u32("cores")? {
                Some(c) => c,
                None => s.u32("cpus")?.unwrap_or(1),
            };
            let details = KindDetails::Container {
                ostype: cfg.text("ostype")?,
                arch: cfg.text("arch")?,
                unprivileged: cfg.flag("unprivileged")?,
                features: cfg.text("features")?,
            };
            (vcpus, None, None, parse_container_disks(&cfg)?, details)
        }
    };

    Ok(SourceInstance {
        vmid,
        name,
        kind,
        status,
        vcpus: vcpus.max(1),
        memory_mb,
        min_memory_mb,
        cpu_sockets,
        interfaces: parse_nics(kind, &cfg)?,
        disks,
        notes: cfg.text("description")?,
        tags,
        details,
    })
}

// ============================================================================
// Node
// ============================================================================

fn prefix_from_netmask(netmask: &str) -> Option<u8> {
    if let Ok(bits) = netmask.parse::<u8>() {
        return Some(bits);
    }
    let mask: Ipv4Addr = netmask.parse().ok()?;
    ipnetwork::ipv4_mask_to_prefix(mask).ok()
}

/// A usable host address, skipping network and broadcast addresses.
fn host_address(
    fields: &Fields<'_>,
    cidr_key: &str,
    address_key: &str,
    netmask_key: &str,
) -> Result<Option<IpNetwork>> {
    let network = if let Some(cidr) = fields.text(cidr_key)? {
        cidr.parse::<IpNetwork>()
            .map_err(|e| fields.malformed(cidr_key, format!("invalid CIDR '{cidr}': {e}")))?
    } else if let Some(address) = fields.text(address_key)? {
        let ip: IpAddr = address
            .parse()
            .map_err(|_| fields.malformed(address_key, format!("invalid address '{address}'")))?;
        match fields.text(netmask_key)? {
            Some(mask) => {
                let prefix = prefix_from_netmask(&mask).ok_or_else(|| {
                    fields.malformed(netmask_key, format!("invalid netmask '{mask}'"))
                })?;
                IpNetwork::new(ip, prefix)
                    .map_err(|e| fields.malformed(netmask_key, e.to_string()))?
            }
            None => IpNetwork::from(ip),
        }
    } else {
        return Ok(None);
    };

    if let IpNetwork::V4(v4) = network {
        if v4.prefix() < 31 && (v4.ip() == v4.network() || v4.ip() == v4.broadcast()) {
            return Ok(None);
        }
    }
    Ok(Some(network))
}

fn parse_host_interface(entry: &Map<String, Value>) -> Result<HostInterfaceSpec> {
    let f = Fields::new("node network entry", entry);
    let name = f
        .text("iface")?
        .ok_or_else(|| f.malformed("iface", "missing interface name"))?;
    let f = Fields::new(format!("network/{name}"), entry);

    let kind = f
        .text("type")?
        .map(|t| HostInterfaceKind::from(t.as_str()))
        .unwrap_or_else(|| HostInterfaceKind::Other("unknown".to_string()));

    let mut addresses = Vec::new();
    addresses.extend(host_address(&f, "cidr", "address", "netmask")?);
    addresses.extend(host_address(&f, "cidr6", "address6", "netmask6")?);

    let members: Vec<String> = f
        .text("slaves")?
        .or(f.text("bridge_ports")?)
        .map(|ports| {
            ports
                .split_whitespace()
                .filter(|p| *p != "none")
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let vlan_id = match f.u64("vlan-id")? {
        None => None,
        Some(v) => Some(
            u16::try_from(v).map_err(|_| f.malformed("vlan-id", format!("invalid VLAN id {v}")))?,
        ),
    };

    Ok(HostInterfaceSpec {
        name,
        kind,
        active: f.flag("active")?.unwrap_or(false),
        addresses,
        gateway: f.text("gateway")?,
        comments: f.text("comments")?,
        members,
        vlan_id,
        vlan_raw_device: f.text("vlan-raw-device")?,
    })
}

/// Build a [`SourceNode`] from `nodes/{node}/status`, `version` and `nodes/{node}/network`.
pub(crate) fn parse_node(
    host: &str,
    node: &str,
    status: &Map<String, Value>,
    version: Option<&Map<String, Value>>,
    network: &[Map<String, Value>],
) -> Result<SourceNode> {
    let st = Fields::new(format!("nodes/{node}/status"), status);

    let (cpu_model, cpu_sockets, cpu_cores) = match st.object("cpuinfo")? {
        Some(cpu) => (cpu.text("model")?, cpu.u32("sockets")?, cpu.u32("cpus")?),
        None => (None, None, None),
    };
    let memory_total_bytes = match st.object("memory")? {
        Some(mem) => mem.u64("total")?,
        None => None,
    };
    let rootfs_total_bytes = match st.object("rootfs")? {
        Some(fs) => fs.u64("total")?,
        None => None,
    };

    let pve_version = match version {
        Some(v) => Fields::new("version", v).text("version")?,
        None => None,
    }
    .or(st
        .text("pveversion")?
        .and_then(|v| v.split('/').nth(1).map(str::to_string)));

    let mut interfaces = network
        .iter()
        .map(parse_host_interface)
        .collect::<Result<Vec<_>>>()?;
    interfaces.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(SourceNode {
        host: host.to_string(),
        name: node.to_string(),
        cpu_model,
        cpu_sockets,
        cpu_cores,
        memory_total_bytes,
        rootfs_total_bytes,
        pve_version,
        interfaces,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_parse_size_units() {
        assert_eq!(parse_size_to_mb("32G"), Some(32768));
        assert_eq!(parse_size_to_mb("512M"), Some(512));
        assert_eq!(parse_size_to_mb("1T"), Some(1_048_576));
        assert_eq!(parse_size_to_mb("2048K"), Some(2));
        assert_eq!(parse_size_to_mb("8"), Some(8192));
        assert_eq!(parse_size_to_mb("1.5G"), Some(1536));
        assert_eq!(parse_size_to_mb("10GB"), Some(10240));
        assert_eq!(parse_size_to_mb("huge"), None);
    }

    #[test]
    fn test_disk_format_from_extension() {
        assert_eq!(disk_format("100/vm-100-disk-0.qcow2").as_deref(), Some("qcow2"));
        assert_eq!(disk_format("base.img").as_deref(), Some("raw"));
        assert_eq!(disk_format("backup.tar.zst").as_deref(), Some("tar.zst"));
        assert_eq!(disk_format("vm-100-disk-0"), None);
    }

    #[test]
    fn test_parse_tags() {
        let tags = parse_tags("prod; web ,,db");
        assert_eq!(
            tags.into_iter().collect::<Vec<_>>(),
            vec!["db".to_string(), "prod".to_string(), "web".to_string()]
        );
    }

    #[test]
    fn test_normalize_mac() {
        assert_eq!(
            normalize_mac("bc:24:11:aa:bb:cc").as_deref(),
            Some("BC:24:11:AA:BB:CC")
        );
        assert_eq!(normalize_mac("bc:24:11:aa:bb"), None);
    }

    #[test]
    fn test_vm_config_parsing() {
        let summary = obj(json!({"vmid": 100, "name": "web-01", "status": "running", "maxmem": 4294967296u64}));
        let config = obj(json!({
            "name": "web-01",
            "memory": "4096",
            "balloon": 1024,
            "sockets": 2,
            "cores": 2,
            "cpu": "x86-64-v2-AES",
            "ostype": "l26",
            "numa": 1,
            "boot": "order=net0;scsi0;ide2",
            "scsi0": "local-lvm:vm-100-disk-0,iothread=1,size=32G",
            "scsi1": "local:100/vm-100-disk-1.qcow2,size=10G",
            "ide2": "local:iso/debian.iso,media=cdrom",
            "net0": "virtio=bc:24:11:aa:bb:cc,bridge=vmbr0,firewall=1,tag=20",
            "ipconfig0": "ip=10.0.0.10/24,gw=10.0.0.1",
            "tags": "prod;web",
            "description": "os: Debian 12\nowner: ops"
        }));
        let vm = parse_instance(InstanceKind::Vm, &summary, &config).unwrap();
        assert_eq!(vm.vmid, 100);
        assert_eq!(vm.status, InstanceStatus::Running);
        assert_eq!(vm.vcpus, 4);
        assert_eq!(vm.memory_mb, Some(4096));
        assert_eq!(vm.min_memory_mb, Some(1024));
        assert_eq!(vm.cpu_sockets, Some(2));
        assert_eq!(vm.disks.len(), 2);
        assert_eq!(vm.disks[0].name, "scsi0");
        assert!(vm.disks[0].boot);
        assert_eq!(vm.disks[0].storage.as_deref(), Some("local-lvm"));
        assert_eq!(vm.disks[1].format.as_deref(), Some("qcow2"));
        assert_eq!(vm.boot_disk_mb(), Some(32768));

        let nic = &vm.interfaces[0];
        assert_eq!(nic.mac, "BC:24:11:AA:BB:CC");
        assert_eq!(nic.model.as_deref(), Some("virtio"));
        assert_eq!(nic.vlan_tag, Some(20));
        assert_eq!(
            nic.static_addresses,
            vec!["10.0.0.10/24".parse::<IpNetwork>().unwrap()]
        );

        match &vm.details {
            KindDetails::Vm {
                numa,
                boot_order,
                cpu_type,
                ..
            } => {
                assert_eq!(*numa, Some(true));
                assert_eq!(boot_order.as_deref(), Some("net0;scsi0;ide2"));
                assert_eq!(cpu_type.as_deref(), Some("x86-64-v2-AES"));
            }
            other => panic!("unexpected details {:?}", other),
        }
    }

    #[test]
    fn test_bootdisk_fallback() {
        let summary = obj(json!({"vmid": 101, "status": "stopped"}));
        let config = obj(json!({
            "bootdisk": "virtio1",
            "virtio0": "local-lvm:vm-101-disk-0,size=8G",
            "virtio1": "local-lvm:vm-101-disk-1,size=16G"
        }));
        let vm = parse_instance(InstanceKind::Vm, &summary, &config).unwrap();
        assert_eq!(vm.name, "vm-101");
        assert_eq!(vm.disks[0].name, "virtio1");
        assert!(vm.disks[0].boot);
        assert!(!vm.disks[1].boot);
    }

    #[test]
    fn test_container_config_parsing() {
        let summary = obj(json!({"vmid": "200", "status": "stopped", "cpus": 2}));
        let config = obj(json!({
            "hostname": "ct-db",
            "memory": 1024,
            "arch": "amd64",
            "ostype": "debian",
            "unprivileged": 1,
            "features": "nesting=1",
            "rootfs": "local-zfs:subvol-200-disk-0,size=8G",
            "mp0": "local-zfs:subvol-200-disk-1,mp=/var/lib/postgresql,size=20G",
            "net0": "name=eth0,bridge=vmbr1,hwaddr=BC:24:11:00:00:01,ip=192.168.1.20/24,ip6=dhcp,type=veth"
        }));
        let ct = parse_instance(InstanceKind::Container, &summary, &config).unwrap();
        assert_eq!(ct.vmid, 200);
        assert_eq!(ct.name, "ct-db");
        assert_eq!(ct.vcpus, 2);
        assert_eq!(ct.disks[0].name, "rootfs");
        assert_eq!(ct.disks[0].mount_point.as_deref(), Some("/"));
        assert_eq!(ct.disks[0].format.as_deref(), Some("raw"));
        assert_eq!(ct.disks[1].mount_point.as_deref(), Some("/var/lib/postgresql"));
        assert_eq!(ct.interfaces[0].model.as_deref(), Some("veth"));
        assert_eq!(ct.interfaces[0].guest_name.as_deref(), Some("eth0"));
        assert_eq!(ct.interfaces[0].static_addresses.len(), 1);
    }

    #[test]
    fn test_nic_without_mac_is_skipped() {
        let summary = obj(json!({"vmid": 102, "status": "running"}));
        let config = obj(json!({"net0": "bridge=vmbr0", "net1": "e1000=BC:24:11:00:00:02"}));
        let vm = parse_instance(InstanceKind::Vm, &summary, &config).unwrap();
        assert_eq!(vm.interfaces.len(), 1);
        assert_eq!(vm.interfaces[0].index, 1);
    }

    #[test]
    fn test_malformed_values_fail_fast() {
        let summary = obj(json!({"vmid": 103, "status": "running"}));
        let config = obj(json!({"cores": "many"}));
        let err = parse_instance(InstanceKind::Vm, &summary, &config).unwrap_err();
        assert!(matches!(err, SourceError::MalformedData { .. }));

        let config = obj(json!({"net0": "virtio=BC:24:11:00:00:02,tag=vlan"}));
        let err = parse_instance(InstanceKind::Vm, &summary, &config).unwrap_err();
        assert!(err.to_string().contains("net0"));

        let summary = obj(json!({"status": "running"}));
        assert!(parse_instance(InstanceKind::Vm, &summary, &Map::new()).is_err());
    }

    #[test]
    fn test_agent_interfaces() {
        let payload = json!({"result": [
            {"name": "lo", "hardware-address": "00:00:00:00:00:00",
             "ip-addresses": [{"ip-address": "127.0.0.1", "ip-address-type": "ipv4", "prefix": 8}]},
            {"name": "ens18", "hardware-address": "bc:24:11:aa:bb:cc",
             "ip-addresses": [
                {"ip-address": "10.0.0.10", "ip-address-type": "ipv4", "prefix": 24},
                {"ip-address": "fe80::1", "ip-address-type": "ipv6", "prefix": 64},
                {"ip-address": "garbage", "ip-address-type": "ipv4", "prefix": 24}
             ]}
        ]});
        let guest = parse_agent_interfaces(&payload);
        assert_eq!(guest.len(), 1);
        assert_eq!(guest[0].addresses.len(), 2);

        let mut nics = vec![NetworkInterfaceSpec {
            index: 0,
            mac: "BC:24:11:AA:BB:CC".to_string(),
            bridge: None,
            vlan_tag: None,
            model: None,
            static_addresses: vec![],
            guest_addresses: vec![],
            guest_name: None,
        }];
        attach_guest_addresses(&mut nics, &guest);
        assert_eq!(nics[0].guest_addresses.len(), 2);
        assert_eq!(nics[0].guest_name.as_deref(), Some("ens18"));
    }

    #[test]
    fn test_node_parsing() {
        let status = obj(json!({
            "cpuinfo": {"model": "AMD EPYC 7302P", "sockets": 1, "cpus": 32},
            "memory": {"total": 137438953472u64, "used": 1},
            "rootfs": {"total": 100000000000u64},
            "pveversion": "pve-manager/8.1.3/b46aac3b42da5d15"
        }));
        let network = vec![
            obj(json!({"iface": "vmbr0", "type": "bridge", "active": 1,
                       "cidr": "10.0.0.2/24", "gateway": "10.0.0.1", "bridge_ports": "bond0"})),
            obj(json!({"iface": "bond0", "type": "bond", "active": 1, "slaves": "eno1 eno2"})),
            obj(json!({"iface": "eno1", "type": "eth", "active": 1})),
            obj(json!({"iface": "vmbr1", "type": "bridge", "address": "192.168.5.0",
                       "netmask": "255.255.255.0", "bridge_ports": "none"})),
        ];
        let node = parse_node("pve1.lan", "pve1", &status, None, &network).unwrap();
        assert_eq!(node.pve_version.as_deref(), Some("8.1.3"));
        assert_eq!(node.cpu_cores, Some(32));
        assert_eq!(node.interfaces[0].name, "bond0");
        assert_eq!(node.interfaces[0].members, vec!["eno1", "eno2"]);
        let vmbr0 = node.interfaces.iter().find(|i| i.name == "vmbr0").unwrap();
        assert_eq!(vmbr0.addresses, vec!["10.0.0.2/24".parse::<IpNetwork>().unwrap()]);
        let vmbr1 = node.interfaces.iter().find(|i| i.name == "vmbr1").unwrap();
        assert!(vmbr1.addresses.is_empty());
        assert!(vmbr1.members.is_empty());
        assert!(!vmbr1.active);
    }
}
