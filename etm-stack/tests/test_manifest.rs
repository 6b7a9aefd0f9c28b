use std::fs;
use std::io::Write;

use etm_stack::domain::{ResolveError, Tid, TraceId};
use etm_stack::resolver::{AddressResolver, Manifest, MappedAddress, ThreadRegistry};
use tempfile::{tempdir, NamedTempFile};

const MANIFEST: &str = r#"{
  "maps": [
    { "start": 4096, "end": 8192, "path": "/system/bin/app", "pgoff": 65536 },
    { "trace_id": 18, "start": 16384, "end": 20480, "path": "[kernel]" }
  ],
  "symbols": { "/system/bin/app": [ { "addr": 65536, "len": 64, "name": "main" } ] },
  "build_ids": { "/system/bin/app": "ab12" },
  "threads": [ { "pid": 100, "tid": 101, "comm": "worker" } ]
}"#;

#[test]
fn test_load_manifest_file() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(MANIFEST.as_bytes()).unwrap();

    let manifest = Manifest::load(file.path()).expect("Failed to load manifest");
    assert_eq!(
        manifest.resolve(TraceId(16), 4100),
        Some(MappedAddress {
            path: "/system/bin/app".to_string(),
            offset: 65540,
        })
    );
    assert_eq!(
        manifest.symbols("/system/bin/app").map(|s| s.len()),
        Some(1)
    );
    assert_eq!(
        manifest.build_id("/system/bin/app").as_deref(),
        Some("ab12")
    );

    let worker = manifest.thread(Tid(101)).expect("thread 101 is listed");
    assert_eq!(worker.comm, "worker");
    assert_eq!(worker.pid.0, 100);
    assert!(manifest.thread(Tid(100)).is_none());
}

#[test]
fn test_maps_restricted_to_trace_id() {
    let manifest = Manifest::from_json(MANIFEST).unwrap();
    assert!(manifest.resolve(TraceId(16), 16384).is_none());
    assert_eq!(
        manifest.resolve(TraceId(18), 16400).map(|m| m.path),
        Some("[kernel]".to_string())
    );
}

#[test]
fn test_missing_manifest_file() {
    let dir = tempdir().unwrap();
    let err = Manifest::load(dir.path().join("manifest.json")).unwrap_err();
    assert!(matches!(err, ResolveError::Read { .. }));
}

#[test]
fn test_invalid_manifest_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("manifest.json");
    fs::write(&path, r#"{ "maps": 3 }"#).unwrap();
    assert!(matches!(Manifest::load(&path), Err(ResolveError::Json(_))));
}

#[test]
fn test_binary_cache_fallback() {
    let cache = tempdir().unwrap();
    fs::create_dir_all(cache.path().join("system/lib64")).unwrap();
    fs::write(
        cache.path().join("system/lib64/libbroken.so"),
        b"not an ELF file",
    )
    .unwrap();

    let manifest = Manifest::from_json(MANIFEST)
        .unwrap()
        .with_binary_cache(cache.path());

    // Listed tables win over the cache
    assert_eq!(
        manifest.symbols("/system/bin/app").map(|s| s.len()),
        Some(1)
    );
    // Unreadable or missing binaries have no symbols
    assert!(manifest.symbols("/system/lib64/libbroken.so").is_none());
    assert!(manifest.symbols("/system/lib64/libmissing.so").is_none());
    assert!(manifest.build_id("/system/lib64/libmissing.so").is_none());
}

#[test]
fn test_no_binary_cache() {
    let manifest = Manifest::from_json(MANIFEST).unwrap();
    assert!(manifest.symbols("/system/lib64/libc.so").is_none());
    assert!(manifest.plt_symbols("/system/bin/app").is_none());
}
