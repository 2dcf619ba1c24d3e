//! VM descriptor (`.vmx`) parsing.
//!
//! Descriptors are `key = "value"` lines. A small ordered rule table maps
//! keys to record fields; lines are folded into an all-empty accumulator and a
//! later line for the same field overwrites an earlier one. Lines without `=`
//! or with unrecognised keys are ignored.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use crate::core::errors::VmiError;
use crate::core::paths::resolve_sibling;
use crate::inventory::disk::DiskSizeResolver;
use crate::inventory::record::VmRecord;
use crate::platform::pal::FileSystemReader;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    GuestOs,
    MemSize,
    VcpuCount,
    PrimaryDisk,
    MacAddress,
}

/// Keys are compared ASCII-case-insensitively against the trimmed left-hand side.
const RULES: &[(&[&str], Field)] = &[
    (&["guestOS"], Field::GuestOs),
    (&["memsize"], Field::MemSize),
    (&["numvcpus"], Field::VcpuCount),
    (&["scsi0:0.fileName", "ide0:0.fileName"], Field::PrimaryDisk),
    (
        &["ethernet0.generatedAddress", "ethernet0.address"],
        Field::MacAddress,
    ),
];

/// Raw values pulled out of a descriptor, before formatting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DescriptorFields {
    pub guest_os: Option<String>,
    pub memsize: Option<String>,
    pub numvcpus: Option<String>,
    pub primary_disk: Option<String>,
    pub mac_address: Option<String>,
}

impl DescriptorFields {
    /// Fold every line of `text` into a field set.
    pub fn extract(text: &str) -> Self {
        text.lines().fold(Self::default(), Self::absorb_line)
    }

    fn absorb_line(mut self, line: &str) -> Self {
        let Some((key, value)) = split_assignment(line) else {
            return self;
        };
        let Some(field) = match_rule(key) else {
            return self;
        };
        let slot = match field {
            Field::GuestOs => &mut self.guest_os,
            Field::MemSize => &mut self.memsize,
            Field::VcpuCount => &mut self.numvcpus,
            Field::PrimaryDisk => &mut self.primary_disk,
            Field::MacAddress => &mut self.mac_address,
        };
        *slot = Some(value);
        self
    }
}

/// `key = "value"` → (`key`, `value`). The value is the text between the
/// first and any second `=`, trimmed and stripped of surrounding quotes.
fn split_assignment(line: &str) -> Option<(&str, String)> {
    let mut parts = line.split('=');
    let key = parts.next()?.trim();
    let value = parts.next()?.trim().trim_matches('"');
    Some((key, value.to_string()))
}

fn match_rule(key: &str) -> Option<Field> {
    RULES.iter().find_map(|(keys, field)| {
        keys.iter()
            .any(|candidate| candidate.eq_ignore_ascii_case(key))
            .then_some(*field)
    })
}

/// Result of parsing one descriptor: always a record, plus the failure that
/// degraded it, if any.
#[derive(Debug)]
pub struct ParseOutcome {
    pub record: VmRecord,
    pub issue: Option<VmiError>,
}

/// Builds [`VmRecord`]s from descriptor files.
pub struct DescriptorParser<'a> {
    fs: &'a dyn FileSystemReader,
    extension: &'a str,
    disk_scan_limit: u64,
}

impl<'a> DescriptorParser<'a> {
    /// `extension` is the bare descriptor extension (e.g. `"vmx"`).
    /// `disk_scan_limit` is handed to [`DiskSizeResolver`]; the VM
    /// descriptor itself is always read whole.
    pub fn new(fs: &'a dyn FileSystemReader, extension: &'a str, disk_scan_limit: u64) -> Self {
        Self {
            fs,
            extension,
            disk_scan_limit,
        }
    }

    /// Parse `path`. Never fails: unreadable descriptors yield an
    /// all-`Unknown` record with the read error attached.
    pub fn parse(&self, path: &Path) -> ParseOutcome {
        let mut record = VmRecord::unknown(path, self.extension);

        let bytes = match self.fs.read_all(path) {
            Ok(bytes) => bytes,
            Err(source) => {
                return ParseOutcome {
                    record,
                    issue: Some(VmiError::DescriptorRead {
                        path: path.to_path_buf(),
                        source,
                    }),
                };
            }
        };
        let fields = DescriptorFields::extract(&String::from_utf8_lossy(&bytes));

        if let Some(os) = fields.guest_os {
            record.guest_os = os;
        }
        if let Some(mem) = fields.memsize {
            record.ram_size = format!("{mem} MB");
        }
        if let Some(cpus) = fields.numvcpus {
            record.cpu_count = format!("{cpus} vCPUs");
        }
        if let Some(mac) = fields.mac_address {
            record.mac_address = mac;
        }

        let mut issue = None;
        if let Some(disk) = fields.primary_disk {
            let resolution = DiskSizeResolver::new(self.fs, self.disk_scan_limit)
                .resolve(&self.disk_path(path, &disk));
            record.disk_size = resolution.size;
            issue = resolution.issue;
        }

        ParseOutcome { record, issue }
    }

    /// Absolute location of a disk reference found in `descriptor`.
    pub fn disk_path(&self, descriptor: &Path, reference: &str) -> PathBuf {
        resolve_sibling(descriptor, reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::record::UNKNOWN;
    use crate::platform::pal::{LocalFs, MemoryFs};

    const LIMIT: u64 = 1024 * 1024;

    const UBUNTU_VMX: &str = r#".encoding = "UTF-8"
config.version = "8"
virtualHW.version = "19"
displayName = "ubuntu"
guestOS = "ubuntu-64"
memsize = "4096"
numvcpus = "2"
scsi0.present = "TRUE"
scsi0:0.fileName = "ubuntu.vmdk"
ethernet0.present = "TRUE"
ethernet0.addressType = "generated"
ethernet0.generatedAddress = "00:0c:29:3a:5b:7c"
"#;

    #[test]
    fn extracts_core_fields() {
        let fields = DescriptorFields::extract(UBUNTU_VMX);
        assert_eq!(fields.guest_os.as_deref(), Some("ubuntu-64"));
        assert_eq!(fields.memsize.as_deref(), Some("4096"));
        assert_eq!(fields.numvcpus.as_deref(), Some("2"));
        assert_eq!(fields.primary_disk.as_deref(), Some("ubuntu.vmdk"));
        assert_eq!(fields.mac_address.as_deref(), Some("00:0c:29:3a:5b:7c"));
    }

    #[test]
    fn sibling_keys_do_not_clobber_fields() {
        let text = "guestOS = \"windows9-64\"\nguestOS.detailed.data = \"x\"\n\
                    ethernet0.address = \"00:50:56:00:00:01\"\nethernet0.addressType = \"static\"\n";
        let fields = DescriptorFields::extract(text);
        assert_eq!(fields.guest_os.as_deref(), Some("windows9-64"));
        assert_eq!(fields.mac_address.as_deref(), Some("00:50:56:00:00:01"));
    }

    #[test]
    fn later_lines_overwrite_earlier_ones() {
        let text = "memsize = \"1024\"\nscsi0:0.fileName = \"a.vmdk\"\n\
                    memsize = \"8192\"\nide0:0.fileName = \"b.vmdk\"\n";
        let fields = DescriptorFields::extract(text);
        assert_eq!(fields.memsize.as_deref(), Some("8192"));
        assert_eq!(fields.primary_disk.as_deref(), Some("b.vmdk"));
    }

    #[test]
    fn malformed_lines_are_ignored() {
        let text = "guestOS\n# comment\n\nnumvcpus = \"4\"\n   \n=\"orphan\"\n";
        let fields = DescriptorFields::extract(text);
        assert_eq!(fields.guest_os, None);
        assert_eq!(fields.numvcpus.as_deref(), Some("4"));
    }

    #[test]
    fn keys_match_case_insensitively_and_tolerate_spacing() {
        let fields = DescriptorFields::extract("GUESTOS=\"other\"\n  MemSize   =   2048\n");
        assert_eq!(fields.guest_os.as_deref(), Some("other"));
        assert_eq!(fields.memsize.as_deref(), Some("2048"));
    }

    #[test]
    fn value_stops_at_second_equals_sign() {
        let (key, value) = split_assignment("guestOS = \"a=b\"").unwrap();
        assert_eq!(key, "guestOS");
        assert_eq!(value, "a");
    }

    #[test]
    fn formats_record_fields() {
        let fs = MemoryFs::new()
            .with_file("/vms/ubuntu/ubuntu.vmx", UBUNTU_VMX)
            .with_file("/vms/ubuntu/ubuntu.vmdk", "RW 8388608 SPARSE \"ubuntu-s001.vmdk\"\n")
            .with_sized("/vms/ubuntu/ubuntu-s001.vmdk", 2_147_483_648);
        let outcome =
            DescriptorParser::new(&fs, "vmx", LIMIT).parse(Path::new("/vms/ubuntu/ubuntu.vmx"));

        let record = outcome.record;
        assert!(outcome.issue.is_none());
        assert_eq!(record.name, "ubuntu");
        assert_eq!(record.guest_os, "ubuntu-64");
        assert_eq!(record.ram_size, "4096 MB");
        assert_eq!(record.cpu_count, "2 vCPUs");
        assert_eq!(record.disk_size, "2.00 GB");
        assert_eq!(record.mac_address, "00:0c:29:3a:5b:7c");
    }

    #[test]
    fn missing_disk_leaves_other_fields_populated() {
        let fs = MemoryFs::new().with_file("/vms/ubuntu/ubuntu.vmx", UBUNTU_VMX);
        let outcome =
            DescriptorParser::new(&fs, "vmx", LIMIT).parse(Path::new("/vms/ubuntu/ubuntu.vmx"));
        assert_eq!(outcome.record.disk_size, UNKNOWN);
        assert_eq!(outcome.record.guest_os, "ubuntu-64");
        assert_eq!(outcome.record.ram_size, "4096 MB");
        assert!(outcome.issue.is_none());
    }

    #[test]
    fn unreadable_descriptor_yields_unknown_record_with_issue() {
        let fs = MemoryFs::new().with_unreadable("/vms/locked/locked.vmx");
        let outcome =
            DescriptorParser::new(&fs, "vmx", LIMIT).parse(Path::new("/vms/locked/locked.vmx"));
        assert_eq!(outcome.record.name, "locked");
        assert_eq!(outcome.record.guest_os, UNKNOWN);
        assert_eq!(outcome.issue.map(|e| e.code()), Some("VMI-2001"));
    }

    #[test]
    fn absent_descriptor_is_contained() {
        let fs = MemoryFs::new();
        let outcome = DescriptorParser::new(&fs, "vmx", LIMIT).parse(Path::new("/vms/ghost.vmx"));
        assert_eq!(outcome.record.name, "ghost");
        assert!(outcome.issue.is_some());
    }

    #[test]
    fn descriptor_longer_than_disk_scan_limit_is_read_whole() {
        let padding: String = (0..40)
            .map(|i| format!("annotation.line{i} = \"padding padding\"\n"))
            .collect();
        let text = format!(
            "{padding}memsize = \"4096\"\nethernet0.generatedAddress = \"00:0c:29:aa:bb:cc\"\n"
        );
        assert!(text.len() > 1024);
        let fs = MemoryFs::new().with_file("/vms/big/big.vmx", text);

        let outcome = DescriptorParser::new(&fs, "vmx", 512).parse(Path::new("/vms/big/big.vmx"));
        assert!(outcome.issue.is_none());
        assert_eq!(outcome.record.ram_size, "4096 MB");
        assert_eq!(outcome.record.mac_address, "00:0c:29:aa:bb:cc");
    }

    #[test]
    fn absolute_disk_reference_is_kept() {
        let parser = DescriptorParser::new(&LocalFs, "vmx", LIMIT);
        assert_eq!(
            parser.disk_path(Path::new("/vms/a/a.vmx"), "/shared/base.vmdk"),
            PathBuf::from("/shared/base.vmdk")
        );
    }

    #[test]
    fn parses_real_descriptor_with_monolithic_disk() {
        let dir = tempfile::tempdir().unwrap();
        let vmx = dir.path().join("lab.vmx");
        std::fs::write(&vmx, "numvcpus = \"1\"\nide0:0.fileName = \"lab.vmdk\"\n").unwrap();
        let disk = std::fs::File::create(dir.path().join("lab.vmdk")).unwrap();
        disk.set_len(1_073_741_824).unwrap();

        let outcome = DescriptorParser::new(&LocalFs, "vmx", LIMIT).parse(&vmx);
        assert_eq!(outcome.record.cpu_count, "1 vCPUs");
        assert_eq!(outcome.record.disk_size, "1.00 GB");
        assert_eq!(outcome.record.ram_size, UNKNOWN);
    }
}
