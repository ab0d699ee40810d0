// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Boot image unpack/repack and the ramdisk codec.
//!
//! Repacked images land at stable per-instance paths
//! (`boot_repacked.img`, `vendor_boot_repacked.img`). A repack that
//! produces identical bytes leaves the existing file (and its mtime)
//! untouched so the composite disk is not needlessly rebuilt, which would
//! wipe userdata from previous boots.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use cvd_adapters::files::{
    copy_file, discard_tmp, ensure_directory_exists, file_size, install_if_changed,
};
use cvd_adapters::HostCommand;
use cvd_core::Status;

use crate::avb::Avb;

const TMP_EXTENSION: &str = ".tmp";
const CPIO_EXTENSION: &str = ".cpio";
const CPIO_MAGIC: &[u8; 6] = b"070701";
const STRIPPED_RAMDISK_DIR: &str = "stripped_ramdisk_dir";
const STRIPPED_RAMDISK: &str = "stripped_ramdisk";
const CONCATENATED_VENDOR_RAMDISK: &str = "concatenated_vendor_ramdisk";

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(suffix);
    PathBuf::from(s)
}

/// Pull the value following `key` up to the next newline out of an
/// `unpack_bootimg` / `avbtool info_image` dump.
pub fn extract_value(dictionary: &str, key: &str) -> Option<String> {
    let start = dictionary.find(key)? + key.len();
    let rest = &dictionary[start..];
    let end = rest.find('\n')?;
    Some(rest[..end].to_string())
}

fn is_cpio_archive(path: &Path) -> bool {
    let Ok(mut file) = File::open(path) else {
        return false;
    };
    let mut magic = [0u8; 6];
    match file.read_exact(&mut magic) {
        Ok(()) => &magic == CPIO_MAGIC,
        Err(_) => false,
    }
}

/// `mkbootfs dir | lz4 -c -l -12 --favor-decSpeed > out`
pub async fn pack_ramdisk(
    artifacts_dir: &Path,
    ramdisk_stage_dir: &Path,
    output_ramdisk: &Path,
) -> Result<(), Status> {
    let cpio_path = with_suffix(output_ramdisk, CPIO_EXTENSION);
    let cpio_out = File::create(&cpio_path)
        .map_err(|e| Status::filesystem(format!("create {}: {e}", cpio_path.display())))?;
    HostCommand::host_binary(artifacts_dir, "mkbootfs")
        .arg(ramdisk_stage_dir.display().to_string())
        .stdout(cpio_out)
        .run_ok()
        .await?;

    let lz4_out = File::create(output_ramdisk)
        .map_err(|e| Status::filesystem(format!("create {}: {e}", output_ramdisk.display())))?;
    HostCommand::new("lz4")
        .args(["-c", "-l", "-12", "--favor-decSpeed"])
        .arg(cpio_path.display().to_string())
        .stdout(lz4_out)
        .run_ok()
        .await
}

/// Decompress (or pass through) a ramdisk and extract it with cpio.
///
/// The extraction reruns `cpio -idu` while it exits 0 to consume
/// concatenated archives; see DESIGN.md for the provenance of this loop.
pub async fn unpack_ramdisk(
    original_ramdisk_path: &Path,
    ramdisk_stage_dir: &Path,
) -> Result<(), Status> {
    let cpio_path = with_suffix(original_ramdisk_path, CPIO_EXTENSION);
    if is_cpio_archive(original_ramdisk_path) {
        copy_file(original_ramdisk_path, &cpio_path)?;
    } else {
        let out = File::create(&cpio_path)
            .map_err(|e| Status::filesystem(format!("create {}: {e}", cpio_path.display())))?;
        HostCommand::new("lz4")
            .args(["-c", "-d", "-l"])
            .arg(original_ramdisk_path.display().to_string())
            .stdout(out)
            .run_ok()
            .await?;
    }
    ensure_directory_exists(ramdisk_stage_dir)?;

    // One open file description shared across runs: each cpio invocation
    // consumes the next concatenated archive from the current offset, and
    // the loop ends when a run hits end-of-file and fails.
    let input = File::open(&cpio_path)
        .map_err(|e| Status::filesystem(format!("open {}: {e}", cpio_path.display())))?;
    loop {
        let stdin = input
            .try_clone()
            .map_err(|e| Status::filesystem(format!("dup {}: {e}", cpio_path.display())))?;
        let outcome = HostCommand::new("cpio")
            .arg("-idu")
            .current_dir(ramdisk_stage_dir)
            .stdin(stdin)
            .run()
            .await?;
        if !outcome.success() {
            break;
        }
    }
    Ok(())
}

/// Strip `lib/modules` out of a kernel-modules ramdisk and prepend the
/// result to the original vendor ramdisk.
async fn repack_vendor_ramdisk(
    artifacts_dir: &Path,
    kernel_modules_ramdisk_path: &Path,
    original_ramdisk_path: &Path,
    new_ramdisk_path: &Path,
    build_dir: &Path,
) -> Result<(), Status> {
    let stage_dir = build_dir.join(STRIPPED_RAMDISK_DIR);
    unpack_ramdisk(kernel_modules_ramdisk_path, &stage_dir).await?;

    let modules_dir = stage_dir.join("lib/modules");
    if modules_dir.exists() {
        fs::remove_dir_all(&modules_dir)
            .map_err(|e| Status::filesystem(format!("rm -rf {}: {e}", modules_dir.display())))?;
    }

    let stripped = build_dir.join(STRIPPED_RAMDISK);
    pack_ramdisk(artifacts_dir, &stage_dir, &stripped).await?;

    let mut out = File::create(new_ramdisk_path)
        .map_err(|e| Status::filesystem(format!("create {}: {e}", new_ramdisk_path.display())))?;
    for part in [&stripped, &original_ramdisk_path.to_path_buf()] {
        let bytes = fs::read(part)
            .map_err(|e| Status::filesystem(format!("read {}: {e}", part.display())))?;
        out.write_all(&bytes)
            .map_err(|e| Status::filesystem(format!("write {}: {e}", new_ramdisk_path.display())))?;
    }
    Ok(())
}

/// Unpack a boot image, capturing the header dump to `<dir>/boot_params`.
pub async fn unpack_boot_image(
    artifacts_dir: &Path,
    boot_image_path: &Path,
    unpack_dir: &Path,
) -> Result<(), Status> {
    ensure_directory_exists(unpack_dir)?;
    let params_path = unpack_dir.join("boot_params");
    let params = File::create(&params_path)
        .map_err(|e| Status::filesystem(format!("create {}: {e}", params_path.display())))?;
    HostCommand::host_binary(artifacts_dir, "unpack_bootimg")
        .arg("--boot_img")
        .arg(boot_image_path.display().to_string())
        .arg("--out")
        .arg(unpack_dir.display().to_string())
        .stdout(params)
        .run_ok()
        .await
}

/// Unpack a vendor boot image once, concatenating all `vendor_ramdisk*`
/// fragments. The params file doubles as the "already unpacked" marker.
pub async fn unpack_vendor_boot_image_if_not_unpacked(
    artifacts_dir: &Path,
    vendor_boot_image_path: &Path,
    unpack_dir: &Path,
) -> Result<(), Status> {
    let params_path = unpack_dir.join("vendor_boot_params");
    if params_path.exists() {
        return Ok(());
    }
    ensure_directory_exists(unpack_dir)?;
    let params = File::create(&params_path)
        .map_err(|e| Status::filesystem(format!("create {}: {e}", params_path.display())))?;
    HostCommand::host_binary(artifacts_dir, "unpack_bootimg")
        .arg("--boot_img")
        .arg(vendor_boot_image_path.display().to_string())
        .arg("--out")
        .arg(unpack_dir.display().to_string())
        .stdout(params)
        .run_ok()
        .await?;

    let concat_path = unpack_dir.join(CONCATENATED_VENDOR_RAMDISK);
    let mut concat = File::create(&concat_path)
        .map_err(|e| Status::filesystem(format!("create {}: {e}", concat_path.display())))?;
    let mut fragments: Vec<PathBuf> = fs::read_dir(unpack_dir)
        .map_err(|e| Status::filesystem(format!("readdir {}: {e}", unpack_dir.display())))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with("vendor_ramdisk"))
                .unwrap_or(false)
        })
        .collect();
    fragments.sort();
    for fragment in fragments {
        let bytes = fs::read(&fragment)
            .map_err(|e| Status::filesystem(format!("read {}: {e}", fragment.display())))?;
        concat
            .write_all(&bytes)
            .map_err(|e| Status::filesystem(format!("write {}: {e}", concat_path.display())))?;
    }
    Ok(())
}

/// Rebuild a boot image around a replacement kernel.
pub async fn repack_boot_image(
    avb: &Avb,
    artifacts_dir: &Path,
    new_kernel_path: &Path,
    boot_image_path: &Path,
    new_boot_image_path: &Path,
    build_dir: &Path,
) -> Result<(), Status> {
    unpack_boot_image(artifacts_dir, boot_image_path, build_dir).await?;

    let boot_params = fs::read_to_string(build_dir.join("boot_params"))
        .map_err(|e| Status::filesystem(format!("read boot_params: {e}")))?;
    let kernel_cmdline = extract_value(&boot_params, "command line args: ").unwrap_or_default();

    let tmp_path = with_suffix(new_boot_image_path, TMP_EXTENSION);
    let result = async {
        HostCommand::host_binary(artifacts_dir, "mkbootimg")
            .arg("--kernel")
            .arg(new_kernel_path.display().to_string())
            .arg("--ramdisk")
            .arg(build_dir.join("ramdisk").display().to_string())
            .arg("--header_version")
            .arg("4")
            .arg("--cmdline")
            .arg(&kernel_cmdline)
            .arg("-o")
            .arg(tmp_path.display().to_string())
            .run_ok()
            .await?;

        // Footer sized to the original partition, or 0 when the new image
        // no longer fits it.
        let original_size = file_size(boot_image_path);
        let footer_size = if file_size(&tmp_path) <= original_size {
            original_size
        } else {
            0
        };
        avb.add_hash_footer(&tmp_path, "boot", footer_size).await?;
        install_if_changed(&tmp_path, new_boot_image_path)?;
        Ok(())
    }
    .await;
    if result.is_err() {
        discard_tmp(&tmp_path);
    }
    result
}

/// Rebuild a vendor boot image, optionally swapping in a kernel-modules
/// ramdisk and folding bootconfig into the cmdline when unsupported.
pub async fn repack_vendor_boot_image(
    avb: &Avb,
    artifacts_dir: &Path,
    new_ramdisk: Option<&Path>,
    vendor_boot_image_path: &Path,
    new_vendor_boot_image_path: &Path,
    unpack_dir: &Path,
    bootconfig_supported: bool,
) -> Result<(), Status> {
    unpack_vendor_boot_image_if_not_unpacked(artifacts_dir, vendor_boot_image_path, unpack_dir)
        .await?;

    let ramdisk_path = match new_ramdisk {
        Some(kernel_modules_ramdisk) => {
            let repacked = unpack_dir.join("vendor_ramdisk_repacked");
            if !repacked.exists() {
                repack_vendor_ramdisk(
                    artifacts_dir,
                    kernel_modules_ramdisk,
                    &unpack_dir.join(CONCATENATED_VENDOR_RAMDISK),
                    &repacked,
                    unpack_dir,
                )
                .await?;
            }
            repacked
        }
        None => unpack_dir.join(CONCATENATED_VENDOR_RAMDISK),
    };

    let bootconfig = fs::read_to_string(unpack_dir.join("bootconfig")).unwrap_or_default();
    let vendor_boot_params = fs::read_to_string(unpack_dir.join("vendor_boot_params"))
        .map_err(|e| Status::filesystem(format!("read vendor_boot_params: {e}")))?;
    let mut kernel_cmdline =
        extract_value(&vendor_boot_params, "vendor command line args: ").unwrap_or_default();
    if !bootconfig_supported {
        kernel_cmdline.push(' ');
        kernel_cmdline.push_str(&bootconfig.replace('\n', " "));
        // Module parameters ride bootconfig as kernel.<key>=<value>; without
        // bootconfig support they go back on the cmdline under their old
        // names.
        kernel_cmdline = kernel_cmdline.replace(" kernel.", " ");
    }

    let tmp_path = with_suffix(new_vendor_boot_image_path, TMP_EXTENSION);
    let result = async {
        let mut repack_cmd = HostCommand::host_binary(artifacts_dir, "mkbootimg")
            .arg("--vendor_ramdisk")
            .arg(ramdisk_path.display().to_string())
            .arg("--header_version")
            .arg("4")
            .arg("--vendor_cmdline")
            .arg(&kernel_cmdline)
            .arg("--vendor_boot")
            .arg(tmp_path.display().to_string())
            .arg("--dtb")
            .arg(unpack_dir.join("dtb").display().to_string());
        if bootconfig_supported {
            repack_cmd = repack_cmd
                .arg("--vendor_bootconfig")
                .arg(unpack_dir.join("bootconfig").display().to_string());
        }
        repack_cmd.run_ok().await?;

        avb.add_hash_footer(&tmp_path, "vendor_boot", file_size(vendor_boot_image_path))
            .await?;
        install_if_changed(&tmp_path, new_vendor_boot_image_path)?;
        Ok(())
    }
    .await;
    if result.is_err() {
        discard_tmp(&tmp_path);
    }
    result
}

/// Fixed preamble of the gem5 synthesized bootconfig.
const GEM5_BOOTCONFIG_PREAMBLE: &str = "androidboot.slot_suffix=_a\n\
androidboot.force_normal_boot=1\n\
androidboot.verifiedbootstate=orange\n";

/// Synthesize the initrd gem5 boots from, emulating what a bootloader
/// would do at runtime: boot ramdisk, vendor ramdisk, then the bootconfig
/// blob with its length/checksum/trailer framing.
pub async fn repack_gem5_boot_image(
    artifacts_dir: &Path,
    initrd_path: &Path,
    persistent_bootconfig_path: &Path,
    unpack_dir: &Path,
    input_ramdisk_path: Option<&Path>,
) -> Result<(), Status> {
    let repacked_ramdisk = unpack_dir.join("vendor_ramdisk_repacked");
    if let Some(input_ramdisk) = input_ramdisk_path {
        if input_ramdisk.exists() && !repacked_ramdisk.exists() {
            repack_vendor_ramdisk(
                artifacts_dir,
                input_ramdisk,
                &unpack_dir.join(CONCATENATED_VENDOR_RAMDISK),
                &repacked_ramdisk,
                unpack_dir,
            )
            .await?;
        }
    }
    let vendor_ramdisk = if repacked_ramdisk.exists() {
        repacked_ramdisk
    } else {
        unpack_dir.join(CONCATENATED_VENDOR_RAMDISK)
    };

    let boot_ramdisk = fs::read(unpack_dir.join("ramdisk"))
        .map_err(|e| Status::filesystem(format!("read boot ramdisk: {e}")))?;
    let vendor_ramdisk_bytes = fs::read(&vendor_ramdisk)
        .map_err(|e| Status::filesystem(format!("read {}: {e}", vendor_ramdisk.display())))?;
    let vendor_bootconfig = fs::read(unpack_dir.join("bootconfig")).unwrap_or_default();
    let persistent_bootconfig = fs::read(persistent_bootconfig_path).unwrap_or_default();

    let mut bootconfig = Vec::new();
    bootconfig.extend_from_slice(GEM5_BOOTCONFIG_PREAMBLE.as_bytes());
    bootconfig.extend_from_slice(&vendor_bootconfig);
    bootconfig.extend_from_slice(&persistent_bootconfig);
    // Trim the block-size padding from the persistent bootconfig.
    while bootconfig.last() == Some(&0) {
        bootconfig.pop();
    }

    let mut out = File::create(initrd_path)
        .map_err(|e| Status::filesystem(format!("create {}: {e}", initrd_path.display())))?;
    let write = |out: &mut File, bytes: &[u8]| {
        out.write_all(bytes)
            .map_err(|e| Status::filesystem(format!("write {}: {e}", initrd_path.display())))
    };
    write(&mut out, &boot_ramdisk)?;
    write(&mut out, &vendor_ramdisk_bytes)?;
    write(&mut out, &bootconfig)?;
    write(&mut out, &(bootconfig.len() as u32).to_le_bytes())?;
    let checksum: u32 = bootconfig.iter().map(|&b| b as u32).sum();
    write(&mut out, &checksum.to_le_bytes())?;
    write(&mut out, b"#BOOTCONFIG\n")?;
    Ok(())
}

#[cfg(test)]
#[path = "boot_image_tests.rs"]
mod tests;
