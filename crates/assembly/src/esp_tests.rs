// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[parameterized(
    arm = { Arch::Arm, "bootarm.efi" },
    arm64 = { Arch::Arm64, "bootaa64.efi" },
    riscv64 = { Arch::RiscV64, "bootriscv64.efi" },
    x86 = { Arch::X86, "bootia32.efi" },
    x86_64 = { Arch::X86_64, "bootx64.efi" },
)]
fn efi_blob_names(arch: Arch, expected: &str) {
    assert_eq!(efi_blob_name(arch), expected);
}

#[test]
fn linux_cmdline_for_x86_64() {
    let builder = init_linux_args(Arch::X86_64, LinuxEspBuilder::new("/tmp/esp.img"));
    let cmdline = builder.cmdline();
    assert!(cmdline.starts_with("root=/dev/vda2 "));
    assert!(cmdline.contains("console=hvc0"));
    assert!(cmdline.contains("panic=-1"));
    assert!(cmdline.contains("noefi"));
    assert!(cmdline.contains("console=ttyS0"));
    assert!(cmdline.contains("pnpacpi=off"));
    assert!(cmdline.contains("noexec=off"));
}

#[test]
fn linux_cmdline_for_arm64_uses_amba_console() {
    let builder = init_linux_args(Arch::Arm64, LinuxEspBuilder::new("/tmp/esp.img"));
    let cmdline = builder.cmdline();
    assert!(cmdline.contains("console=ttyAMA0"));
    assert!(!cmdline.contains("pnpacpi"));
}

#[test]
fn chrome_os_cmdline_and_root() {
    let builder = init_chrome_os_args(LinuxEspBuilder::new("/tmp/esp.img")).root("/dev/vda3");
    let cmdline = builder.cmdline();
    assert!(cmdline.starts_with("root=/dev/vda3 "));
    assert!(cmdline.contains("init=/sbin/init"));
    assert!(cmdline.contains("boot=local"));
    assert!(cmdline.contains("rootwait"));
    assert!(cmdline.contains("noresume"));
    assert!(cmdline.contains("cros_efi"));
}

#[test]
fn later_root_call_wins() {
    // ChromeOS overrides the default /dev/vda2 root with /dev/vda3.
    let builder = LinuxEspBuilder::new("/tmp/esp.img").root("/dev/vda2").root("/dev/vda3");
    assert!(builder.cmdline().starts_with("root=/dev/vda3"));
}

#[test]
fn grub_config_mentions_initrd_only_when_present() {
    let without = LinuxEspBuilder::new("/tmp/esp.img").root("/dev/vda2");
    assert!(!without.grub_config().contains("initrd"));

    let with = LinuxEspBuilder::new("/tmp/esp.img")
        .root("/dev/vda2")
        .initrd("/k/initrd.img");
    let cfg = with.grub_config();
    assert!(cfg.contains("    linux /vmlinuz root=/dev/vda2\n"));
    assert!(cfg.contains("    initrd /initrd\n"));
    assert!(cfg.starts_with("set timeout=0\n"));
}

#[tokio::test]
async fn build_without_kernel_is_a_precondition_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = LinuxEspBuilder::new(dir.path().join("esp.img"))
        .root("/dev/vda2")
        .architecture(Arch::X86_64)
        .build(dir.path())
        .await
        .unwrap_err();
    assert_eq!(err.kind, cvd_core::StatusKind::Precondition);
    assert!(err.message.contains("kernel"));
}

#[tokio::test]
async fn android_flow_needs_no_esp() {
    let dir = tempfile::tempdir().unwrap();
    let config = cvd_core::test_support::group_config(dir.path());
    let instance = cvd_core::test_support::instance_config(dir.path(), 1);
    // No ESP required: no tools are invoked and no error surfaces.
    initialize_esp_image(&config, &instance).await.unwrap();
    assert!(!instance.esp_image_path().exists());
}
