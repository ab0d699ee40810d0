// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! EFI system partition construction.
//!
//! An ESP is a FAT image populated with `mcopy`/`mmd` from mtools: a grub
//! loader (or a prebuilt EFI application), its config, and the kernel
//! payloads for the selected boot flow.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use cvd_adapters::files::truncate_file;
use cvd_adapters::HostCommand;
use cvd_core::{Arch, ApBootFlow, BootFlow, GroupConfig, InstanceConfig, Status, VmmMode};
use tracing::info;

/// Size of every generated ESP image.
const ESP_IMAGE_SIZE_MB: u64 = 32;

/// Removable-media EFI application name for an architecture.
pub fn efi_blob_name(arch: Arch) -> &'static str {
    match arch {
        Arch::Arm => "bootarm.efi",
        Arch::Arm64 => "bootaa64.efi",
        Arch::RiscV64 => "bootriscv64.efi",
        Arch::X86 => "bootia32.efi",
        Arch::X86_64 => "bootx64.efi",
    }
}

/// A kernel argument: bare flag or `key=value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelArg {
    pub key: String,
    pub value: Option<String>,
}

impl KernelArg {
    fn render(&self) -> String {
        match &self.value {
            Some(value) => format!("{}={value}", self.key),
            None => self.key.clone(),
        }
    }
}

/// Builder for a grub-booted Linux-style ESP.
#[derive(Debug)]
pub struct LinuxEspBuilder {
    image_path: PathBuf,
    arguments: Vec<KernelArg>,
    root: Option<String>,
    kernel: Option<PathBuf>,
    initrd: Option<PathBuf>,
    architecture: Option<Arch>,
}

impl LinuxEspBuilder {
    pub fn new(image_path: impl Into<PathBuf>) -> Self {
        Self {
            image_path: image_path.into(),
            arguments: Vec::new(),
            root: None,
            kernel: None,
            initrd: None,
            architecture: None,
        }
    }

    pub fn root(mut self, root: impl Into<String>) -> Self {
        self.root = Some(root.into());
        self
    }

    pub fn argument(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.arguments.push(KernelArg {
            key: key.into(),
            value: Some(value.into()),
        });
        self
    }

    pub fn flag(mut self, key: impl Into<String>) -> Self {
        self.arguments.push(KernelArg {
            key: key.into(),
            value: None,
        });
        self
    }

    pub fn kernel(mut self, kernel: impl Into<PathBuf>) -> Self {
        self.kernel = Some(kernel.into());
        self
    }

    pub fn initrd(mut self, initrd: impl Into<PathBuf>) -> Self {
        self.initrd = Some(initrd.into());
        self
    }

    pub fn architecture(mut self, arch: Arch) -> Self {
        self.architecture = Some(arch);
        self
    }

    /// The kernel cmdline the grub config will carry.
    pub fn cmdline(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        if let Some(root) = &self.root {
            parts.push(format!("root={root}"));
        }
        parts.extend(self.arguments.iter().map(KernelArg::render));
        parts.join(" ")
    }

    /// Rendered grub.cfg contents.
    pub fn grub_config(&self) -> String {
        let mut cfg = String::from("set timeout=0\nmenuentry \"Linux\" {\n");
        let _ = writeln!(cfg, "    linux /vmlinuz {}", self.cmdline());
        if self.initrd.is_some() {
            cfg.push_str("    initrd /initrd\n");
        }
        cfg.push_str("}\n");
        cfg
    }

    /// Assemble the image.
    pub async fn build(self, artifacts_dir: &Path) -> Result<(), Status> {
        let arch = self
            .architecture
            .ok_or_else(|| Status::precondition("ESP builder needs an architecture"))?;
        let kernel = self
            .kernel
            .clone()
            .ok_or_else(|| Status::precondition("ESP builder needs a kernel"))?;
        if self.root.is_none() {
            return Err(Status::precondition("ESP builder needs a root device"));
        }

        let esp = EspImage::create(artifacts_dir, &self.image_path).await?;
        let grub_blob = artifacts_dir
            .join("etc/grub")
            .join(format!("grub-{arch}.efi"));
        esp.install(&grub_blob, &format!("::EFI/BOOT/{}", efi_blob_name(arch)))
            .await?;

        let grub_cfg_path = self.image_path.with_extension("grub.cfg");
        fs::write(&grub_cfg_path, self.grub_config())
            .map_err(|e| Status::filesystem(format!("write {}: {e}", grub_cfg_path.display())))?;
        esp.install(&grub_cfg_path, "::EFI/BOOT/grub.cfg").await?;

        esp.install(&kernel, "::vmlinuz").await?;
        if let Some(initrd) = &self.initrd {
            esp.install(initrd, "::initrd").await?;
        }
        Ok(())
    }
}

/// Builder for the Android-EFI-loader ESP: just the loader application.
#[derive(Debug)]
pub struct AndroidEfiLoaderEspBuilder {
    image_path: PathBuf,
    efi_loader_path: Option<PathBuf>,
    architecture: Option<Arch>,
}

impl AndroidEfiLoaderEspBuilder {
    pub fn new(image_path: impl Into<PathBuf>) -> Self {
        Self {
            image_path: image_path.into(),
            efi_loader_path: None,
            architecture: None,
        }
    }

    pub fn efi_loader_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.efi_loader_path = Some(path.into());
        self
    }

    pub fn architecture(mut self, arch: Arch) -> Self {
        self.architecture = Some(arch);
        self
    }

    pub async fn build(self, artifacts_dir: &Path) -> Result<(), Status> {
        let arch = self
            .architecture
            .ok_or_else(|| Status::precondition("ESP builder needs an architecture"))?;
        let loader = self
            .efi_loader_path
            .ok_or_else(|| Status::precondition("ESP builder needs the EFI loader path"))?;
        let esp = EspImage::create(artifacts_dir, &self.image_path).await?;
        esp.install(&loader, &format!("::EFI/BOOT/{}", efi_blob_name(arch)))
            .await
    }
}

/// Builder for the Fuchsia ESP: zedboot plus the multiboot shim.
#[derive(Debug)]
pub struct FuchsiaEspBuilder {
    image_path: PathBuf,
    zedboot: Option<PathBuf>,
    multiboot_bin: Option<PathBuf>,
    architecture: Option<Arch>,
}

impl FuchsiaEspBuilder {
    pub fn new(image_path: impl Into<PathBuf>) -> Self {
        Self {
            image_path: image_path.into(),
            zedboot: None,
            multiboot_bin: None,
            architecture: None,
        }
    }

    pub fn zedboot(mut self, path: impl Into<PathBuf>) -> Self {
        self.zedboot = Some(path.into());
        self
    }

    pub fn multiboot_binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.multiboot_bin = Some(path.into());
        self
    }

    pub fn architecture(mut self, arch: Arch) -> Self {
        self.architecture = Some(arch);
        self
    }

    pub async fn build(self, artifacts_dir: &Path) -> Result<(), Status> {
        let arch = self
            .architecture
            .ok_or_else(|| Status::precondition("ESP builder needs an architecture"))?;
        let zedboot = self
            .zedboot
            .ok_or_else(|| Status::precondition("ESP builder needs the zedboot image"))?;
        let multiboot = self
            .multiboot_bin
            .ok_or_else(|| Status::precondition("ESP builder needs the multiboot binary"))?;
        let esp = EspImage::create(artifacts_dir, &self.image_path).await?;
        let grub_blob = artifacts_dir
            .join("etc/grub")
            .join(format!("grub-{arch}.efi"));
        esp.install(&grub_blob, &format!("::EFI/BOOT/{}", efi_blob_name(arch)))
            .await?;
        esp.install(&zedboot, "::zedboot.zbi").await?;
        esp.install(&multiboot, "::multiboot.bin").await?;
        Ok(())
    }
}

/// A freshly formatted FAT image plus mtools-based population.
struct EspImage {
    path: PathBuf,
}

impl EspImage {
    async fn create(artifacts_dir: &Path, path: &Path) -> Result<Self, Status> {
        truncate_file(path, ESP_IMAGE_SIZE_MB << 20)?;
        HostCommand::host_binary(artifacts_dir, "newfs_msdos")
            .args(["-F", "32", "-m", "0xf8", "-a", "2"])
            .arg(path.display().to_string())
            .run_ok()
            .await?;
        let esp = Self {
            path: path.to_path_buf(),
        };
        esp.mmd("::EFI").await?;
        esp.mmd("::EFI/BOOT").await?;
        Ok(esp)
    }

    async fn mmd(&self, dir: &str) -> Result<(), Status> {
        HostCommand::new("mmd")
            .arg("-i")
            .arg(self.path.display().to_string())
            .arg(dir)
            .run_ok()
            .await
    }

    async fn install(&self, src: &Path, dest: &str) -> Result<(), Status> {
        HostCommand::new("mcopy")
            .arg("-o")
            .arg("-i")
            .arg(self.path.display().to_string())
            .arg("-s")
            .arg(src.display().to_string())
            .arg(dest)
            .run_ok()
            .await
    }
}

/// Linux cmdline defaults shared by the Linux flow and the AP image.
pub fn init_linux_args(target_arch: Arch, builder: LinuxEspBuilder) -> LinuxEspBuilder {
    let builder = builder
        .root("/dev/vda2")
        .argument("console", "hvc0")
        .argument("panic", "-1")
        .flag("noefi");
    match target_arch {
        Arch::Arm | Arch::Arm64 => builder.argument("console", "ttyAMA0"),
        Arch::RiscV64 => builder.argument("console", "ttyS0"),
        Arch::X86 | Arch::X86_64 => builder
            .argument("console", "ttyS0")
            .argument("pnpacpi", "off")
            .argument("acpi", "noirq")
            .argument("reboot", "k")
            .argument("noexec", "off"),
    }
}

/// ChromeOS cmdline defaults.
pub fn init_chrome_os_args(builder: LinuxEspBuilder) -> LinuxEspBuilder {
    builder
        .root("/dev/vda2")
        .argument("console", "ttyS0")
        .argument("panic", "-1")
        .flag("noefi")
        .flag("init=/sbin/init")
        .flag("boot=local")
        .flag("rootwait")
        .flag("noresume")
        .flag("noswap")
        .flag("loglevel=7")
        .flag("noinitrd")
        .flag("cros_efi")
        .flag("cros_debug")
        .flag("earlyprintk=serial,ttyS0,115200")
        .flag("earlycon=uart8250,io,0x3f8")
        .argument("pnpacpi", "off")
        .argument("acpi", "noirq")
        .argument("reboot", "k")
        .argument("noexec", "off")
}

fn esp_required_for_ap_boot_flow(flow: ApBootFlow) -> bool {
    flow == ApBootFlow::Grub
}

async fn build_ap_image(config: &GroupConfig, instance: &InstanceConfig) -> Result<(), Status> {
    let kernel = config.ap_kernel_image.clone().ok_or_else(|| {
        Status::precondition("AP boot flow requires an AP kernel image")
    })?;
    let builder = init_linux_args(
        config.target_arch,
        LinuxEspBuilder::new(instance.ap_esp_image_path()),
    )
    .root("/dev/vda2")
    .architecture(config.target_arch)
    .kernel(kernel);
    builder.build(&config.host_artifacts_path).await
}

async fn build_os_image(config: &GroupConfig, instance: &InstanceConfig) -> Result<(), Status> {
    match config.boot_flow {
        BootFlow::AndroidEfiLoader => {
            let loader = instance.android_efi_loader.clone().ok_or_else(|| {
                Status::precondition("android_efi_loader flow requires the loader path")
            })?;
            AndroidEfiLoaderEspBuilder::new(instance.esp_image_path())
                .efi_loader_path(loader)
                .architecture(config.target_arch)
                .build(&config.host_artifacts_path)
                .await
        }
        BootFlow::ChromeOs => {
            let kernel = instance.chromeos_kernel_path.clone().ok_or_else(|| {
                Status::precondition("chrome_os flow requires a kernel path")
            })?;
            init_chrome_os_args(LinuxEspBuilder::new(instance.esp_image_path()))
                .root("/dev/vda3")
                .architecture(config.target_arch)
                .kernel(kernel)
                .build(&config.host_artifacts_path)
                .await
        }
        BootFlow::Linux => {
            let kernel = instance.linux_kernel_path.clone().ok_or_else(|| {
                Status::precondition("linux flow requires a kernel path")
            })?;
            let mut builder = init_linux_args(
                config.target_arch,
                LinuxEspBuilder::new(instance.esp_image_path()),
            )
            .root("/dev/vda2")
            .architecture(config.target_arch)
            .kernel(kernel);
            if let Some(initramfs) = &instance.linux_initramfs_path {
                builder = builder.initrd(initramfs.clone());
            }
            builder.build(&config.host_artifacts_path).await
        }
        BootFlow::Fuchsia => {
            let zedboot = instance.fuchsia_zedboot_path.clone().ok_or_else(|| {
                Status::precondition("fuchsia flow requires the zedboot path")
            })?;
            let multiboot = instance.fuchsia_multiboot_bin_path.clone().ok_or_else(|| {
                Status::precondition("fuchsia flow requires the multiboot binary path")
            })?;
            FuchsiaEspBuilder::new(instance.esp_image_path())
                .zedboot(zedboot)
                .multiboot_binary(multiboot)
                .architecture(config.target_arch)
                .build(&config.host_artifacts_path)
                .await
        }
        BootFlow::Android | BootFlow::ChromeOsDisk => Ok(()),
    }
}

/// Build the ESP images an instance needs, if any.
pub async fn initialize_esp_image(
    config: &GroupConfig,
    instance: &InstanceConfig,
) -> Result<(), Status> {
    if esp_required_for_ap_boot_flow(config.ap_boot_flow) {
        info!(image = %instance.ap_esp_image_path().display(), "creating AP esp image");
        build_ap_image(config, instance).await?;
    }
    if config.boot_flow.requires_esp() && config.vm_manager != VmmMode::Gem5 {
        info!(image = %instance.esp_image_path().display(), "creating esp image");
        build_os_image(config, instance).await?;
    }
    Ok(())
}

#[cfg(test)]
#[path = "esp_tests.rs"]
mod tests;
