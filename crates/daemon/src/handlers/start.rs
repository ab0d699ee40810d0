// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The `start` / `launch_cvd` verb.
//!
//! Analyzes the request, reserves instance ids, inserts the group row,
//! runs the disk assembly pipeline, and spawns the hypervisor-side
//! launcher with its stdio pointed at the client. Any failure after the
//! row is inserted removes it again and releases every acquired lock.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use cvd_adapters::SubprocessWaiter;
use cvd_assembly::node::PipelineContext;
use cvd_assembly::PipelineRunner;
use cvd_core::{
    envs, Arch, BootFlow, DataImagePolicy, GroupConfig, Instance, InstanceConfig, InstanceGroup,
    InstanceId, InstanceState, Status, VmmMode,
};
use cvd_storage::{InUseState, InstanceLockFile};
use tracing::{info, warn};

use crate::handlers::{group_command, CommandHandler, RequestContext};
use crate::protocol::{Response, WaitBehavior};
use crate::server::ServerShared;

pub struct StartHandler {
    shared: Arc<ServerShared>,
    waiter: SubprocessWaiter,
}

impl StartHandler {
    pub fn new(shared: &Arc<ServerShared>) -> Self {
        Self {
            shared: Arc::clone(shared),
            waiter: SubprocessWaiter::new(),
        }
    }
}

/// `--flag=value` / `--flag value` lookup over raw argv.
fn flag_value(args: &[String], name: &str) -> Option<String> {
    let mut iter = args.iter().peekable();
    while let Some(arg) = iter.next() {
        if let Some(value) = arg.strip_prefix(&format!("{name}=")) {
            return Some(value.to_string());
        }
        if arg == name {
            return iter.next().cloned();
        }
    }
    None
}

fn parse_number(args: &[String], name: &str) -> Result<Option<u32>, Status> {
    let Some(raw) = flag_value(args, name) else {
        return Ok(None);
    };
    raw.parse::<u32>()
        .map(Some)
        .map_err(|_| Status::precondition(format!("{name} is not numeric: \"{raw}\"")))
}

/// Requested instance ids plus the total count.
fn requested_instances(request: &RequestContext) -> Result<(Vec<InstanceId>, usize), Status> {
    if let Some(raw) = flag_value(&request.args, "--instance_nums") {
        let mut ids = Vec::new();
        for token in raw.split(',') {
            let id = token.trim().parse::<InstanceId>().map_err(|_| {
                Status::precondition(format!("--instance_nums entry is not numeric: \"{token}\""))
            })?;
            ids.push(id);
        }
        let count = ids.len();
        return Ok((ids, count));
    }

    let count = parse_number(&request.args, "--num_instances")?.unwrap_or(1) as usize;
    let base = match parse_number(&request.args, "--instance_num")? {
        Some(base) => Some(base),
        None => request.selector.instance_id,
    };
    match base {
        Some(base) => {
            let ids = (base..base + count as u32).collect();
            Ok((ids, count))
        }
        None => Ok((Vec::new(), count)),
    }
}

#[derive(Debug)]
struct StartAnalysis {
    home: PathBuf,
    host_artifacts: PathBuf,
    product_out: PathBuf,
    config: GroupConfig,
    group: InstanceGroup,
    default_target_zip: Option<PathBuf>,
    system_target_zip: Option<PathBuf>,
}

fn analyze(
    request: &RequestContext,
    locks: &[InstanceLockFile],
) -> Result<StartAnalysis, Status> {
    let home = request
        .env
        .get(envs::HOME)
        .map(PathBuf::from)
        .ok_or_else(|| Status::precondition("HOME is not set in the request environment"))?;
    let host_artifacts = request
        .env
        .get(envs::ANDROID_HOST_OUT)
        .map(PathBuf::from)
        .ok_or_else(|| Status::precondition("ANDROID_HOST_OUT is required to start devices"))?;
    let product_out = request
        .env
        .get(envs::ANDROID_PRODUCT_OUT)
        .map(PathBuf::from)
        .unwrap_or_else(|| host_artifacts.clone());

    let ids: Vec<InstanceId> = locks.iter().map(|l| l.id()).collect();
    let group_name = request
        .selector
        .group_name
        .clone()
        .unwrap_or_else(|| InstanceGroup::default_name(&ids));

    let vm_manager = match flag_value(&request.args, "--vm_manager").as_deref() {
        None | Some("crosvm") => VmmMode::Crosvm,
        Some("qemu_cli") | Some("qemu") => VmmMode::Qemu,
        Some("gem5") => VmmMode::Gem5,
        Some(other) => {
            return Err(Status::precondition(format!("unknown vm manager: {other}")))
        }
    };
    let target_arch = match flag_value(&request.args, "--target_arch") {
        Some(raw) => raw.parse::<Arch>().map_err(Status::precondition)?,
        None => Arch::X86_64,
    };
    let data_policy = match flag_value(&request.args, "--data_policy").as_deref() {
        None => DataImagePolicy::CreateIfMissing,
        Some("use_existing") => DataImagePolicy::UseExisting,
        Some("always_create") => DataImagePolicy::AlwaysCreate,
        Some("create_if_missing") => DataImagePolicy::CreateIfMissing,
        Some("resize_up_to") => DataImagePolicy::ResizeUpTo,
        Some(other) => {
            return Err(Status::precondition(format!("unknown data policy: {other}")))
        }
    };

    let kernel_path = flag_value(&request.args, "--kernel_path").map(PathBuf::from);
    let initramfs_path = flag_value(&request.args, "--initramfs_path").map(PathBuf::from);
    let bootloader = flag_value(&request.args, "--bootloader").map(PathBuf::from);
    let blank_data_image_mb =
        parse_number(&request.args, "--blank_data_image_mb")?.unwrap_or(2048) as u64;
    let userdata_format =
        flag_value(&request.args, "--userdata_format").unwrap_or_else(|| "ext4".to_string());
    let bootconfig_supported = flag_value(&request.args, "--bootconfig_supported")
        .map(|v| v != "false")
        .unwrap_or(true);
    let pause_in_bootloader = flag_value(&request.args, "--pause_in_bootloader")
        .map(|v| v != "false")
        .unwrap_or(false);

    let mut instances = Vec::new();
    let mut instance_configs = Vec::new();
    for &id in &ids {
        instances.push(Instance::with_default_name(id));
        instance_configs.push(InstanceConfig {
            id,
            instance_dir: home.join(format!("cvd-{id}")),
            bootconfig_supported,
            pause_in_bootloader,
            boot_slot: flag_value(&request.args, "--boot_slot"),
            kernel_cmdline: flag_value(&request.args, "--extra_kernel_cmdline")
                .map(|raw| raw.split_whitespace().map(str::to_owned).collect())
                .unwrap_or_default(),
            bootconfig_args: BTreeMap::new(),
            kernel_path: kernel_path.clone(),
            initramfs_path: initramfs_path.clone(),
            bootloader: bootloader.clone(),
            boot_image: product_out.join("boot.img"),
            vendor_boot_image: product_out.join("vendor_boot.img"),
            init_boot_image: Some(product_out.join("init_boot.img")),
            super_image: product_out.join("super.img"),
            data_image: product_out.join("userdata.img"),
            vbmeta_image: product_out.join("vbmeta.img"),
            vbmeta_system_image: product_out.join("vbmeta_system.img"),
            vbmeta_vendor_dlkm_image: Some(product_out.join("vbmeta_vendor_dlkm.img")),
            vbmeta_system_dlkm_image: Some(product_out.join("vbmeta_system_dlkm.img")),
            data_policy,
            blank_data_image_mb,
            userdata_format: userdata_format.clone(),
            blank_misc_image_mb: 1,
            blank_metadata_image_mb: 64,
            blank_sdcard_image_mb: parse_number(&request.args, "--blank_sdcard_image_mb")?
                .unwrap_or(0) as u64,
            linux_kernel_path: None,
            linux_initramfs_path: None,
            linux_root_image: None,
            chromeos_kernel_path: None,
            chromeos_state_image: None,
            chromeos_root_image: None,
            fuchsia_root_image: None,
            android_efi_loader: None,
            fuchsia_zedboot_path: None,
            fuchsia_multiboot_bin_path: None,
            custom_partition_paths: Vec::new(),
            vvmtruststore_path: None,
            hibernation_image: None,
            ap_rootfs_image: None,
            use_overlay: flag_value(&request.args, "--use_overlay")
                .map(|v| v != "false")
                .unwrap_or(false),
            resume: flag_value(&request.args, "--resume")
                .map(|v| v != "false")
                .unwrap_or(true),
        });
    }

    let config = GroupConfig {
        group_name: group_name.clone(),
        home_dir: home.clone(),
        host_artifacts_path: host_artifacts.clone(),
        product_out_path: product_out.clone(),
        vm_manager,
        boot_flow: BootFlow::Android,
        ap_boot_flow: Default::default(),
        target_arch,
        ap_kernel_image: None,
        instances: instance_configs,
    };
    let group = InstanceGroup {
        name: group_name,
        home_dir: home.clone(),
        host_artifacts_path: host_artifacts.clone(),
        product_out_path: product_out.clone(),
        start_time_sec: now_sec(),
        instances,
    };

    Ok(StartAnalysis {
        home,
        host_artifacts,
        product_out,
        config,
        group,
        default_target_zip: flag_value(&request.args, "--default_target_zip").map(PathBuf::from),
        system_target_zip: flag_value(&request.args, "--system_target_zip").map(PathBuf::from),
    })
}

fn now_sec() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

impl StartHandler {
    /// Remove the group row and return every lock token to `not_in_use`.
    fn rollback(&self, group_name: &str, locks: &mut Vec<InstanceLockFile>) {
        if let Err(e) = self.shared.instance_manager.remove_group(group_name) {
            warn!(group = group_name, error = %e, "rollback: group removal failed");
        }
        for mut lock in locks.drain(..) {
            if let Err(e) = lock.set_status(InUseState::NotInUse) {
                warn!(id = lock.id(), error = %e, "rollback: lock token reset failed");
            }
        }
    }

    async fn run_pipeline(&self, analysis: &StartAnalysis) -> Result<(), Status> {
        let runner = PipelineRunner::standard();
        for instance in &analysis.config.instances {
            if self.waiter.is_interrupted() {
                return Err(Status::interrupted());
            }
            let mut ctx =
                PipelineContext::new(analysis.config.clone(), instance.clone())?;
            ctx.default_target_zip = analysis.default_target_zip.clone();
            ctx.system_target_zip = analysis.system_target_zip.clone();
            runner.run(&ctx).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl CommandHandler for StartHandler {
    fn cmd_list(&self) -> &'static [&'static str] {
        &["start", "launch_cvd"]
    }

    async fn handle(&self, request: &RequestContext) -> Result<Response, Status> {
        let manager = &self.shared.instance_manager;

        let (requested_ids, count) = requested_instances(request)?;
        let mut locks = manager.acquire_instance_ids(&requested_ids, count)?;

        let analysis = match analyze(request, &locks) {
            Ok(analysis) => analysis,
            Err(status) => {
                for mut lock in locks.drain(..) {
                    let _ = lock.set_status(InUseState::NotInUse);
                }
                return Err(status);
            }
        };

        let group_name = analysis.group.name.clone();
        info!(
            group = %group_name,
            home = %analysis.home.display(),
            instances = analysis.group.instances.len(),
            "starting device group"
        );

        // The row goes in before any disk work; failures roll it back.
        if let Err(status) = manager.add_group(analysis.group.clone()) {
            for mut lock in locks.drain(..) {
                let _ = lock.set_status(InUseState::NotInUse);
            }
            return Err(status);
        }

        let config_path = InstanceGroup::config_path_for_home(&analysis.home);
        let launch = async {
            analysis.config.save(&config_path)?;
            self.run_pipeline(&analysis).await?;

            let min_id = analysis
                .group
                .instances
                .iter()
                .map(|i| i.id)
                .min()
                .unwrap_or(1);
            let cmd = group_command(
                &analysis.host_artifacts,
                "launch_cvd",
                request,
                Some(&config_path),
            )
            .arg(format!("--base_instance_num={min_id}"))
            .arg(format!("--num_instances={}", analysis.group.instances.len()))
            .env(envs::HOME, analysis.home.display().to_string())
            .env(
                envs::ANDROID_PRODUCT_OUT,
                analysis.product_out.display().to_string(),
            );

            match request.wait_behavior {
                WaitBehavior::Wait => self.waiter.run_ok(cmd).await?,
                WaitBehavior::Start => {
                    cmd.spawn_detached()?;
                }
            }
            Ok::<(), Status>(())
        }
        .await;

        if let Err(status) = launch {
            self.rollback(&group_name, &mut locks);
            return Err(status);
        }

        // Success: devices are live; tokens flip to in_use and the flocks
        // are released (the token is the authoritative gate from here on).
        for instance in &analysis.group.instances {
            let mut updated = instance.clone();
            updated.state = InstanceState::Running;
            manager.update_instance(&updated)?;
        }
        for mut lock in locks.drain(..) {
            lock.set_status(InUseState::InUse)?;
        }
        Ok(Response::command_ok())
    }

    fn interrupt(&self) {
        self.waiter.interrupt();
    }

    fn summary_help(&self) -> &'static str {
        "Start a group of virtual devices"
    }

    fn should_intercept_help(&self) -> bool {
        // launch_cvd owns the authoritative flag list.
        false
    }
}

#[cfg(test)]
#[path = "start_tests.rs"]
mod tests;
