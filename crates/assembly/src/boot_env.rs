// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bootloader environment image.
//!
//! Produces the U-Boot environment consumed by the first-stage loader: a
//! NUL-terminated variable list run through `mkenvimage_slim`, finished
//! with an AVB hash footer. The entrypoint programmed into `uenvcmd`
//! depends on the boot flow.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use cvd_adapters::files::{discard_tmp, install_if_changed};
use cvd_adapters::HostCommand;
use cvd_core::{BootFlow, InstanceConfig, Status};

use crate::avb::{Avb, MAX_AVB_METADATA_SIZE};

/// The guest's primary ethernet is the second tap device we pass.
const UBOOT_PRIMARY_ETH: &str = "eth1";

/// Alignment shift for the env partition size.
const PARTITION_SIZE_SHIFT: u32 = 20;

/// Round `value` up to a multiple of `1 << shift`.
pub fn align_to_power_of_2(value: u64, shift: u32) -> u64 {
    let align = 1u64 << shift;
    (value + align - 1) & !(align - 1)
}

fn paused_entrypoint(entrypoint: &str, instance: &InstanceConfig, env: &mut String) {
    if instance.pause_in_bootloader {
        let _ = write!(
            env,
            "if test $paused -ne 1; then paused=1; else {entrypoint}; fi"
        );
    } else {
        env.push_str(entrypoint);
    }
    env.push('\0');
}

fn android_environment(instance: &InstanceConfig, env: &mut String) {
    paused_entrypoint("run bootcmd_android", instance, env);
    if let Some(slot) = &instance.boot_slot {
        if !slot.is_empty() {
            let _ = write!(env, "android_slot_suffix=_{slot}");
            env.push('\0');
        }
    }
    env.push('\0');
}

fn efi_environment(instance: &InstanceConfig, partition_num: Option<u16>, env: &mut String) {
    let partition_str = partition_num
        .map(|n| format!("setenv devplist {n:x};"))
        .unwrap_or_default();
    let entrypoint = format!(
        "{partition_str}load virtio 0:${{devplist}} ${{loadaddr}} efi/boot/bootaa64.efi \
         && bootefi ${{loadaddr}} ${{fdtcontroladdr}}; \
         load virtio 0:${{devplist}} ${{loadaddr}} efi/boot/bootx64.efi && \
         bootefi ${{loadaddr}} ${{fdtcontroladdr}}; \
         load virtio 0:${{devplist}} ${{loadaddr}} efi/boot/bootia32.efi && \
         bootefi ${{loadaddr}} ${{fdtcontroladdr}}; \
         load virtio 0:${{devplist}} ${{loadaddr}} efi/boot/bootriscv64.efi && \
         bootefi ${{loadaddr}} ${{fdtcontroladdr}}"
    );
    paused_entrypoint(&entrypoint, instance, env);
}

/// Render the NUL-terminated environment text for one instance.
pub fn environment_text(instance: &InstanceConfig, flow: BootFlow, kernel_args: &str) -> String {
    let mut env = String::new();
    env.push_str("ethprime=");
    env.push_str(UBOOT_PRIMARY_ETH);
    env.push('\0');
    if kernel_args.is_empty() {
        env.push_str("uenvcmd=setenv bootargs \"$cbootargs\" && ");
    } else {
        let _ = write!(env, "uenvcmd=setenv bootargs \"$cbootargs {kernel_args}\" && ");
    }

    match flow {
        BootFlow::Android => android_environment(instance, &mut env),
        BootFlow::AndroidEfiLoader | BootFlow::ChromeOs | BootFlow::ChromeOsDisk => {
            efi_environment(instance, flow.efi_partition(), &mut env)
        }
        BootFlow::Fuchsia | BootFlow::Linux => efi_environment(instance, None, &mut env),
    }
    env
}

/// Kernel cmdline for the env image: request tokens plus, when the guest
/// kernel lacks bootconfig support, the bootconfig args folded in under
/// their cmdline names.
pub fn kernel_args_for_env(instance: &InstanceConfig) -> String {
    let mut args = instance.kernel_cmdline.join(" ");
    if !instance.bootconfig_supported && !instance.bootconfig_args.is_empty() {
        let mut bootconfig = instance.bootconfig_args.clone();
        // "hardware" moved to bootconfig; on the cmdline it is still
        // "androidboot.hardware".
        if let Some(hw) = bootconfig.remove("hardware") {
            bootconfig.insert("androidboot.hardware".to_string(), hw);
        }
        for (key, value) in &bootconfig {
            if !args.is_empty() {
                args.push(' ');
            }
            let _ = write!(args, "{key}={value}");
        }
        // Module parameters ride bootconfig as kernel.<key>; rename them
        // back to their cmdline form here.
        args = args.replace(" kernel.", " ");
    }
    args
}

/// Build (or refresh) the bootloader env image at `image_path`.
pub async fn prepare_boot_env_image(
    avb: &Avb,
    artifacts_dir: &Path,
    instance: &InstanceConfig,
    image_path: &Path,
    flow: BootFlow,
) -> Result<(), Status> {
    let plaintext_path = instance.mkenvimg_input_path();
    let kernel_args = kernel_args_for_env(instance);
    let env_text = environment_text(instance, flow, &kernel_args);
    if let Some(parent) = plaintext_path.parent() {
        cvd_adapters::files::ensure_directory_exists(parent)?;
    }
    fs::write(&plaintext_path, env_text.as_bytes())
        .map_err(|e| Status::filesystem(format!("write {}: {e}", plaintext_path.display())))?;

    let tmp_path = image_path.with_extension("img.tmp");
    let result = async {
        HostCommand::host_binary(artifacts_dir, "mkenvimage_slim")
            .arg("-output_path")
            .arg(tmp_path.display().to_string())
            .arg("-input_path")
            .arg(plaintext_path.display().to_string())
            .run_ok()
            .await?;

        let env_size = align_to_power_of_2(MAX_AVB_METADATA_SIZE + 4096, PARTITION_SIZE_SHIFT);
        avb.add_hash_footer(&tmp_path, "uboot_env", env_size).await?;
        install_if_changed(&tmp_path, image_path)?;
        Ok(())
    }
    .await;
    if result.is_err() {
        discard_tmp(&tmp_path);
    }
    result
}

#[cfg(test)]
#[path = "boot_env_tests.rs"]
mod tests;
