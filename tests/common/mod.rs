//! Shared fixtures: a synthetic ECMA-335 image builder, a collecting
//! progress sink and catalog helpers.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use portcheck::catalog::{ApiRecord, BreakingChangeRecord, CatalogDocument, TargetSupport};
use portcheck::finder::{ProgressSink, TaskHandle};
use portcheck::types::FrameworkVersion;

const TEXT_RVA: u32 = 0x2000;
const TEXT_RAW: u32 = 0x200;
const COR20_SIZE: u32 = 72;

/// Element-type bytes for building method signatures.
pub const EL_VOID: u8 = 0x01;
pub const EL_I4: u8 = 0x08;
pub const EL_STRING: u8 = 0x0E;

/// Builds minimal managed PE images the metadata reader can open.
pub struct AssemblyBuilder {
    name: String,
    version: (u16, u16, u16, u16),
    assembly_refs: Vec<AssemblyRefFixture>,
    type_refs: Vec<(usize, String, String)>,
    type_defs: Vec<(String, String)>,
    member_refs: Vec<(usize, String, Vec<u8>)>,
    exported_types: Vec<(String, String, usize)>,
}

struct AssemblyRefFixture {
    name: String,
    version: (u16, u16, u16, u16),
    token: Option<[u8; 8]>,
}

impl AssemblyBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            version: (1, 0, 0, 0),
            assembly_refs: Vec::new(),
            type_refs: Vec::new(),
            type_defs: Vec::new(),
            member_refs: Vec::new(),
            exported_types: Vec::new(),
        }
    }

    pub fn version(mut self, major: u16, minor: u16) -> Self {
        self.version = (major, minor, 0, 0);
        self
    }

    /// Returns the 0-based index used by `type_ref` and `forward_type`.
    pub fn assembly_ref(&mut self, name: &str) -> usize {
        self.assembly_refs.push(AssemblyRefFixture {
            name: name.to_string(),
            version: (4, 0, 0, 0),
            token: None,
        });
        self.assembly_refs.len() - 1
    }

    pub fn assembly_ref_with_token(&mut self, name: &str, token: [u8; 8]) -> usize {
        self.assembly_refs.push(AssemblyRefFixture {
            name: name.to_string(),
            version: (4, 0, 0, 0),
            token: Some(token),
        });
        self.assembly_refs.len() - 1
    }

    /// Returns the 0-based index used by `method_ref` and `field_ref`.
    pub fn type_ref(&mut self, assembly_ref: usize, namespace: &str, name: &str) -> usize {
        self.type_refs
            .push((assembly_ref, namespace.to_string(), name.to_string()));
        self.type_refs.len() - 1
    }

    /// Declare a type in this assembly (beyond the `<Module>` placeholder).
    pub fn type_def(&mut self, namespace: &str, name: &str) -> &mut Self {
        self.type_defs.push((namespace.to_string(), name.to_string()));
        self
    }

    /// Reference a method with `params` element-type bytes and a void return.
    pub fn method_ref(&mut self, type_ref: usize, name: &str, params: &[u8]) -> &mut Self {
        let mut signature = vec![0x20, params.len() as u8, EL_VOID];
        signature.extend_from_slice(params);
        self.member_refs
            .push((type_ref, name.to_string(), signature));
        self
    }

    /// Reference an int32 field.
    pub fn field_ref(&mut self, type_ref: usize, name: &str) -> &mut Self {
        self.member_refs
            .push((type_ref, name.to_string(), vec![0x06, EL_I4]));
        self
    }

    /// Forward a type to another assembly.
    pub fn forward_type(&mut self, namespace: &str, name: &str, assembly_ref: usize) -> &mut Self {
        self.exported_types
            .push((namespace.to_string(), name.to_string(), assembly_ref));
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let metadata = self.build_metadata();
        let mut image = Vec::new();

        // DOS header with e_lfanew pointing straight after it.
        image.extend_from_slice(b"MZ");
        image.resize(0x3C, 0);
        image.extend_from_slice(&0x40u32.to_le_bytes());

        // PE signature + COFF header.
        image.extend_from_slice(b"PE\0\0");
        image.extend_from_slice(&0x014Cu16.to_le_bytes()); // machine: i386
        image.extend_from_slice(&1u16.to_le_bytes()); // one section
        image.extend_from_slice(&[0u8; 12]); // timestamp, symbols
        image.extend_from_slice(&0x00E0u16.to_le_bytes()); // optional header size
        image.extend_from_slice(&0x2102u16.to_le_bytes()); // characteristics

        // Optional header (PE32, 0xE0 bytes).
        let optional_start = image.len();
        image.extend_from_slice(&0x010Bu16.to_le_bytes());
        image.resize(optional_start + 92, 0);
        image.extend_from_slice(&16u32.to_le_bytes()); // NumberOfRvaAndSizes
        image.resize(optional_start + 96 + 16 * 8, 0);
        // CLI data directory (index 14).
        let cli_dir = optional_start + 96 + 14 * 8;
        image[cli_dir..cli_dir + 4].copy_from_slice(&TEXT_RVA.to_le_bytes());
        image[cli_dir + 4..cli_dir + 8].copy_from_slice(&COR20_SIZE.to_le_bytes());

        // Section header: .text holding COR20 + metadata.
        let content_size = COR20_SIZE as usize + metadata.len();
        image.extend_from_slice(b".text\0\0\0");
        image.extend_from_slice(&(content_size as u32).to_le_bytes()); // virtual size
        image.extend_from_slice(&TEXT_RVA.to_le_bytes());
        image.extend_from_slice(&(content_size as u32).to_le_bytes()); // raw size
        image.extend_from_slice(&TEXT_RAW.to_le_bytes());
        image.extend_from_slice(&[0u8; 16]);

        image.resize(TEXT_RAW as usize, 0);

        // COR20 header.
        image.extend_from_slice(&COR20_SIZE.to_le_bytes());
        image.extend_from_slice(&2u16.to_le_bytes()); // runtime major
        image.extend_from_slice(&5u16.to_le_bytes()); // runtime minor
        image.extend_from_slice(&(TEXT_RVA + COR20_SIZE).to_le_bytes()); // metadata rva
        image.extend_from_slice(&(metadata.len() as u32).to_le_bytes());
        image.extend_from_slice(&1u32.to_le_bytes()); // flags: IL only
        image.resize(TEXT_RAW as usize + COR20_SIZE as usize, 0);

        image.extend_from_slice(&metadata);
        image
    }

    fn build_metadata(&self) -> Vec<u8> {
        let mut strings = StringsFixture::new();
        let mut blobs = BlobFixture::new();

        // Intern everything up front so heap offsets are known.
        let module_name = strings.intern(&format!("{}.dll", self.name));
        let assembly_name = strings.intern(&self.name);
        let type_ref_names: Vec<(u32, u32)> = self
            .type_refs
            .iter()
            .map(|(_, ns, name)| (strings.intern(name), strings.intern(ns)))
            .collect();
        let type_def_names: Vec<(u32, u32)> = std::iter::once(("<Module>", ""))
            .chain(
                self.type_defs
                    .iter()
                    .map(|(ns, name)| (name.as_str(), ns.as_str())),
            )
            .map(|(name, ns)| (strings.intern(name), strings.intern(ns)))
            .collect();
        let member_ref_rows: Vec<(u32, u32)> = self
            .member_refs
            .iter()
            .map(|(_, name, sig)| (strings.intern(name), blobs.add(sig)))
            .collect();
        let assembly_ref_rows: Vec<(u32, u32)> = self
            .assembly_refs
            .iter()
            .map(|fixture| {
                let token = fixture
                    .token
                    .map(|bytes| blobs.add(&bytes))
                    .unwrap_or_default();
                (strings.intern(&fixture.name), token)
            })
            .collect();
        let exported_names: Vec<(u32, u32)> = self
            .exported_types
            .iter()
            .map(|(ns, name, _)| (strings.intern(name), strings.intern(ns)))
            .collect();

        // #~ stream.
        let mut tables = Vec::new();
        tables.extend_from_slice(&0u32.to_le_bytes()); // reserved
        tables.push(2); // major
        tables.push(0); // minor
        tables.push(0); // heap sizes: all narrow
        tables.push(1); // reserved
        let mut valid: u64 = (1 << 0x00) | (1 << 0x02) | (1 << 0x20);
        if !self.type_refs.is_empty() {
            valid |= 1 << 0x01;
        }
        if !self.member_refs.is_empty() {
            valid |= 1 << 0x0A;
        }
        if !self.assembly_refs.is_empty() {
            valid |= 1 << 0x23;
        }
        if !self.exported_types.is_empty() {
            valid |= 1 << 0x27;
        }
        tables.extend_from_slice(&valid.to_le_bytes());
        tables.extend_from_slice(&0u64.to_le_bytes()); // sorted

        // Row counts, ascending table id.
        tables.extend_from_slice(&1u32.to_le_bytes()); // Module
        if !self.type_refs.is_empty() {
            tables.extend_from_slice(&(self.type_refs.len() as u32).to_le_bytes());
        }
        tables.extend_from_slice(&(type_def_names.len() as u32).to_le_bytes());
        if !self.member_refs.is_empty() {
            tables.extend_from_slice(&(self.member_refs.len() as u32).to_le_bytes());
        }
        tables.extend_from_slice(&1u32.to_le_bytes()); // Assembly
        if !self.assembly_refs.is_empty() {
            tables.extend_from_slice(&(self.assembly_refs.len() as u32).to_le_bytes());
        }
        if !self.exported_types.is_empty() {
            tables.extend_from_slice(&(self.exported_types.len() as u32).to_le_bytes());
        }

        // Module row.
        tables.extend_from_slice(&0u16.to_le_bytes());
        tables.extend_from_slice(&(module_name as u16).to_le_bytes());
        tables.extend_from_slice(&[0u8; 6]); // mvid, encid, encbaseid

        // TypeRef rows: scope is always an AssemblyRef (tag 2).
        for (index, (assembly_ref, _, _)) in self.type_refs.iter().enumerate() {
            let scope = (((assembly_ref + 1) as u16) << 2) | 2;
            tables.extend_from_slice(&scope.to_le_bytes());
            let (name, namespace) = type_ref_names[index];
            tables.extend_from_slice(&(name as u16).to_le_bytes());
            tables.extend_from_slice(&(namespace as u16).to_le_bytes());
        }

        // TypeDef rows.
        for (name, namespace) in &type_def_names {
            tables.extend_from_slice(&0u32.to_le_bytes()); // flags
            tables.extend_from_slice(&(*name as u16).to_le_bytes());
            tables.extend_from_slice(&(*namespace as u16).to_le_bytes());
            tables.extend_from_slice(&0u16.to_le_bytes()); // extends
            tables.extend_from_slice(&1u16.to_le_bytes()); // field list
            tables.extend_from_slice(&1u16.to_le_bytes()); // method list
        }

        // MemberRef rows: parent is always a TypeRef (tag 1).
        for (index, (type_ref, _, _)) in self.member_refs.iter().enumerate() {
            let parent = (((type_ref + 1) as u16) << 3) | 1;
            tables.extend_from_slice(&parent.to_le_bytes());
            let (name, signature) = member_ref_rows[index];
            tables.extend_from_slice(&(name as u16).to_le_bytes());
            tables.extend_from_slice(&(signature as u16).to_le_bytes());
        }

        // Assembly row.
        tables.extend_from_slice(&0x8004u32.to_le_bytes()); // hash algorithm: SHA-1
        for word in [
            self.version.0,
            self.version.1,
            self.version.2,
            self.version.3,
        ] {
            tables.extend_from_slice(&word.to_le_bytes());
        }
        tables.extend_from_slice(&0u32.to_le_bytes()); // flags
        tables.extend_from_slice(&0u16.to_le_bytes()); // public key
        tables.extend_from_slice(&(assembly_name as u16).to_le_bytes());
        tables.extend_from_slice(&0u16.to_le_bytes()); // culture

        // AssemblyRef rows.
        for (index, fixture) in self.assembly_refs.iter().enumerate() {
            for word in [
                fixture.version.0,
                fixture.version.1,
                fixture.version.2,
                fixture.version.3,
            ] {
                tables.extend_from_slice(&word.to_le_bytes());
            }
            tables.extend_from_slice(&0u32.to_le_bytes()); // flags: token form
            let (name, token) = assembly_ref_rows[index];
            tables.extend_from_slice(&(token as u16).to_le_bytes());
            tables.extend_from_slice(&(name as u16).to_le_bytes());
            tables.extend_from_slice(&0u16.to_le_bytes()); // culture
            tables.extend_from_slice(&0u16.to_le_bytes()); // hash value
        }

        // ExportedType rows, all forwarders to an AssemblyRef (tag 1).
        for (index, (_, _, assembly_ref)) in self.exported_types.iter().enumerate() {
            tables.extend_from_slice(&0x0020_0000u32.to_le_bytes()); // tdForwarder
            tables.extend_from_slice(&0u32.to_le_bytes()); // TypeDefId
            let (name, namespace) = exported_names[index];
            tables.extend_from_slice(&(name as u16).to_le_bytes());
            tables.extend_from_slice(&(namespace as u16).to_le_bytes());
            let implementation = (((assembly_ref + 1) as u16) << 2) | 1;
            tables.extend_from_slice(&implementation.to_le_bytes());
        }

        // Metadata root: header + stream directory + stream data.
        let version_bytes = b"v4.0.30319\0\0";
        let header_size = 4 + 2 + 2 + 4 + 4 + version_bytes.len() + 2 + 2;
        let stream_headers = (8 + 4) + (8 + 12) + (8 + 8);
        let tables_offset = header_size + stream_headers;
        let strings_offset = tables_offset + tables.len();
        let blob_offset = strings_offset + strings.data.len();

        let mut metadata = Vec::new();
        metadata.extend_from_slice(&0x424A_5342u32.to_le_bytes());
        metadata.extend_from_slice(&1u16.to_le_bytes());
        metadata.extend_from_slice(&1u16.to_le_bytes());
        metadata.extend_from_slice(&0u32.to_le_bytes());
        metadata.extend_from_slice(&(version_bytes.len() as u32).to_le_bytes());
        metadata.extend_from_slice(version_bytes);
        metadata.extend_from_slice(&0u16.to_le_bytes()); // flags
        metadata.extend_from_slice(&3u16.to_le_bytes()); // stream count

        metadata.extend_from_slice(&(tables_offset as u32).to_le_bytes());
        metadata.extend_from_slice(&(tables.len() as u32).to_le_bytes());
        metadata.extend_from_slice(b"#~\0\0");

        metadata.extend_from_slice(&(strings_offset as u32).to_le_bytes());
        metadata.extend_from_slice(&(strings.data.len() as u32).to_le_bytes());
        metadata.extend_from_slice(b"#Strings\0\0\0\0");

        metadata.extend_from_slice(&(blob_offset as u32).to_le_bytes());
        metadata.extend_from_slice(&(blobs.data.len() as u32).to_le_bytes());
        metadata.extend_from_slice(b"#Blob\0\0\0");

        debug_assert_eq!(metadata.len(), tables_offset);
        metadata.extend_from_slice(&tables);
        metadata.extend_from_slice(&strings.data);
        metadata.extend_from_slice(&blobs.data);
        metadata
    }
}

struct StringsFixture {
    data: Vec<u8>,
    interned: HashMap<String, u32>,
}

impl StringsFixture {
    fn new() -> Self {
        Self {
            data: vec![0],
            interned: HashMap::new(),
        }
    }

    fn intern(&mut self, value: &str) -> u32 {
        if value.is_empty() {
            return 0;
        }
        if let Some(offset) = self.interned.get(value) {
            return *offset;
        }
        let offset = self.data.len() as u32;
        self.data.extend_from_slice(value.as_bytes());
        self.data.push(0);
        self.interned.insert(value.to_string(), offset);
        offset
    }
}

struct BlobFixture {
    data: Vec<u8>,
}

impl BlobFixture {
    fn new() -> Self {
        Self { data: vec![0] }
    }

    fn add(&mut self, blob: &[u8]) -> u32 {
        assert!(blob.len() < 0x80, "fixture blobs stay single-byte-prefixed");
        let offset = self.data.len() as u32;
        self.data.push(blob.len() as u8);
        self.data.extend_from_slice(blob);
        offset
    }
}

/// Progress sink that records issues and ticks for assertions.
#[derive(Debug, Default)]
pub struct CollectingSink {
    pub issues: Mutex<Vec<String>>,
    ticks: Arc<AtomicUsize>,
    cancelled: AtomicBool,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn issue_count(&self) -> usize {
        self.issues.lock().unwrap().len()
    }

    pub fn tick_count(&self) -> usize {
        self.ticks.load(Ordering::Relaxed)
    }
}

struct CountingTask {
    ticks: Arc<AtomicUsize>,
}

impl TaskHandle for CountingTask {
    fn tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    fn abort(&self) {}
}

impl ProgressSink for CollectingSink {
    fn start_task(&self, _name: &str, _total_items: usize) -> Box<dyn TaskHandle> {
        Box::new(CountingTask {
            ticks: Arc::clone(&self.ticks),
        })
    }

    fn report_issue(&self, message: &str) {
        self.issues.lock().unwrap().push(message.to_string());
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// Route tracing output through the test harness; safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// A small catalog document fixture around explicit API records.
pub fn catalog_document(apis: Vec<ApiRecord>, framework_assemblies: Vec<&str>) -> CatalogDocument {
    CatalogDocument {
        version: "fixture-1".to_string(),
        built: Utc::now(),
        framework_assemblies: framework_assemblies
            .into_iter()
            .map(str::to_string)
            .collect(),
        apis,
    }
}

pub fn supported_everywhere(doc_id: &str, targets: &[&str]) -> ApiRecord {
    ApiRecord {
        doc_id: doc_id.to_string(),
        supported: targets
            .iter()
            .map(|spec| TargetSupport {
                target: spec.parse().unwrap(),
                supported: true,
            })
            .collect(),
        breaking_changes: Vec::new(),
    }
}

pub fn unsupported_on(doc_id: &str, target: &str) -> ApiRecord {
    ApiRecord {
        doc_id: doc_id.to_string(),
        supported: vec![TargetSupport {
            target: target.parse().unwrap(),
            supported: false,
        }],
        breaking_changes: Vec::new(),
    }
}

pub fn breaking_change(doc_id: &str, family: &str, introduced: FrameworkVersion) -> BreakingChangeRecord {
    BreakingChangeRecord {
        id: format!("BC-{introduced}"),
        doc_id: doc_id.to_string(),
        family: family.to_string(),
        introduced,
        description: "behavior differs".to_string(),
        remediation: "use the replacement API".to_string(),
        retargeting: false,
    }
}
