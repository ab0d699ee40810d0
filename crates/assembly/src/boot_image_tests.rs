// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn extract_value_pulls_line_suffix() {
    let dump = "boot magic: ANDROID!\ncommand line args: console=ttyS0 panic=-1\nkernel size: 1\n";
    assert_eq!(
        extract_value(dump, "command line args: ").as_deref(),
        Some("console=ttyS0 panic=-1")
    );
    assert_eq!(extract_value(dump, "no such key: "), None);
}

#[test]
fn cpio_magic_detection() {
    let dir = tempfile::tempdir().unwrap();
    let cpio = dir.path().join("ramdisk.cpio");
    fs::write(&cpio, b"070701rest-of-archive").unwrap();
    assert!(is_cpio_archive(&cpio));

    let lz4 = dir.path().join("ramdisk.lz4");
    fs::write(&lz4, [0x04, 0x22, 0x4d, 0x18, 0, 0]).unwrap();
    assert!(!is_cpio_archive(&lz4));

    assert!(!is_cpio_archive(&dir.path().join("missing")));
}

#[tokio::test]
async fn gem5_initrd_framing() {
    let dir = tempfile::tempdir().unwrap();
    let unpack_dir = dir.path().join("unpack");
    fs::create_dir_all(&unpack_dir).unwrap();
    fs::write(unpack_dir.join("ramdisk"), b"BOOTRD").unwrap();
    fs::write(unpack_dir.join(CONCATENATED_VENDOR_RAMDISK), b"VENDRD").unwrap();
    fs::write(unpack_dir.join("bootconfig"), b"a=b\n").unwrap();
    let persistent = dir.path().join("persistent_bootconfig.img");
    // Persistent bootconfig comes with block padding that must be trimmed.
    fs::write(&persistent, b"c=d\n\0\0\0\0").unwrap();

    let initrd = dir.path().join("initrd.img");
    repack_gem5_boot_image(dir.path(), &initrd, &persistent, &unpack_dir, None)
        .await
        .unwrap();

    let bytes = fs::read(&initrd).unwrap();
    let bootconfig = format!("{GEM5_BOOTCONFIG_PREAMBLE}a=b\nc=d\n");
    let mut expected = Vec::new();
    expected.extend_from_slice(b"BOOTRD");
    expected.extend_from_slice(b"VENDRD");
    expected.extend_from_slice(bootconfig.as_bytes());
    expected.extend_from_slice(&(bootconfig.len() as u32).to_le_bytes());
    let checksum: u32 = bootconfig.bytes().map(|b| b as u32).sum();
    expected.extend_from_slice(&checksum.to_le_bytes());
    expected.extend_from_slice(b"#BOOTCONFIG\n");

    assert_eq!(bytes, expected);
}

#[test]
fn tmp_suffix_appends_without_replacing_extension() {
    assert_eq!(
        with_suffix(Path::new("/a/boot_repacked.img"), TMP_EXTENSION),
        PathBuf::from("/a/boot_repacked.img.tmp")
    );
}
