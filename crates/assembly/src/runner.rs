// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The pipeline runner and the concrete node set.
//!
//! The runner checks the disk-space guard, topologically sorts the nodes,
//! and invokes every node's `generate` exactly once per instance.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;

use async_trait::async_trait;
use cvd_adapters::files::{available_space, disk_usage, ensure_directory_exists, file_size};
use cvd_core::{ApBootFlow, Status, VmmMode};
use tracing::{debug, info};

use crate::blank_image::{initialize_blank_image_if_missing, initialize_data_image};
use crate::boot_env::prepare_boot_env_image;
use crate::boot_image::{repack_boot_image, repack_vendor_boot_image};
use crate::composite::{
    os_composite_disk_config, persistent_ap_composite_disk_config,
    persistent_composite_disk_config, DiskBuilder,
};
use crate::esp::initialize_esp_image;
use crate::gem5::gem5_image_unpacker;
use crate::node::{ImageNode, PipelineContext};
use crate::super_image::{rebuild_super_image, should_rebuild_super_image};
use crate::vbmeta::{enforce_minimum_vbmeta_size, generate_persistent_vbmeta};

/// Runs a set of image nodes in dependency order.
pub struct PipelineRunner {
    nodes: Vec<Box<dyn ImageNode>>,
}

impl PipelineRunner {
    pub fn new(nodes: Vec<Box<dyn ImageNode>>) -> Self {
        Self { nodes }
    }

    /// The full disk assembly pipeline.
    pub fn standard() -> Self {
        Self::new(vec![
            Box::new(BootImagesNode),
            Box::new(SuperImageNode),
            Box::new(MiscImageNode),
            Box::new(MetadataImageNode),
            Box::new(FactoryResetProtectedNode),
            Box::new(BootConfigPartitionNode),
            Box::new(PstoreNode),
            Box::new(AccessKregistryNode),
            Box::new(HwcomposerPmemNode),
            Box::new(SdCardNode),
            Box::new(DataImageNode),
            Box::new(EspNode),
            Box::new(BootEnvNode),
            Box::new(PersistentVbmetaNode),
            Box::new(VbmetaSizeNode),
            Box::new(InstanceCompositeNode),
            Box::new(OsCompositeNode),
            Box::new(Gem5Node),
        ])
    }

    /// Kahn's algorithm over the declared dependencies.
    fn topological_order(&self) -> Result<Vec<usize>, Status> {
        let index: HashMap<&str, usize> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.name(), i))
            .collect();
        if index.len() != self.nodes.len() {
            return Err(Status::invariant("duplicate pipeline node name"));
        }

        let mut in_degree = vec![0usize; self.nodes.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];
        for (i, node) in self.nodes.iter().enumerate() {
            for dep in node.dependencies() {
                let Some(&dep_index) = index.get(dep) else {
                    return Err(Status::invariant(format!(
                        "node \"{}\" depends on unknown node \"{dep}\"",
                        node.name()
                    )));
                };
                in_degree[i] += 1;
                dependents[dep_index].push(i);
            }
        }

        let mut ready: VecDeque<usize> = (0..self.nodes.len())
            .filter(|&i| in_degree[i] == 0)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(i) = ready.pop_front() {
            order.push(i);
            for &dependent in &dependents[i] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    ready.push_back(dependent);
                }
            }
        }
        if order.len() != self.nodes.len() {
            return Err(Status::invariant("pipeline dependency cycle"));
        }
        Ok(order)
    }

    /// Verify there is room to fully materialize the sparse data image.
    ///
    /// Reported before any mutation.
    pub fn check_disk_space(ctx: &PipelineContext) -> Result<(), Status> {
        let mut data_path = ctx.instance.data_image.clone();
        if file_size(&data_path) == 0 && disk_usage(&data_path) == 0 {
            data_path = ctx.instance.new_data_image();
        }
        let sparse_size = file_size(&data_path);
        let allocated = disk_usage(&data_path);
        let required = sparse_size.saturating_sub(allocated);
        if required == 0 {
            return Ok(());
        }
        let parent = data_path
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        let available = available_space(&parent)?;
        if available < required {
            return Err(Status::filesystem(format!(
                "not enough space remaining in fs containing \"{}\": {required} bytes needed, \
                 {available} available",
                data_path.display()
            )));
        }
        Ok(())
    }

    /// Run every node once for the context's instance.
    pub async fn run(&self, ctx: &PipelineContext) -> Result<(), Status> {
        Self::check_disk_space(ctx)?;
        ensure_directory_exists(&ctx.instance.instance_dir)?;

        let order = self.topological_order()?;
        for i in order {
            let node = &self.nodes[i];
            debug!(node = node.name(), instance = ctx.instance.id, "generating");
            node.generate(ctx).await.map_err(|e| {
                Status::new(
                    e.kind,
                    format!("image node \"{}\": {}", node.name(), e.message),
                )
            })?;
        }
        info!(instance = ctx.instance.id, "disk assembly complete");
        Ok(())
    }
}

// ── Concrete nodes ───────────────────────────────────────────────────────────

/// Repacked boot / vendor-boot images. Only runs when a replacement kernel
/// or initramfs was supplied; otherwise the source images feed the
/// composite directly.
struct BootImagesNode;

#[async_trait]
impl ImageNode for BootImagesNode {
    fn name(&self) -> &'static str {
        "boot_images"
    }

    async fn generate(&self, ctx: &PipelineContext) -> Result<(), Status> {
        let instance = &ctx.instance;
        let unpack_dir = instance.instance_dir.join("unpacked_boot");
        if let Some(kernel) = &instance.kernel_path {
            ensure_directory_exists(&unpack_dir)?;
            repack_boot_image(
                &ctx.avb,
                ctx.artifacts_dir(),
                kernel,
                &instance.boot_image,
                &instance.new_boot_image(),
                &unpack_dir,
            )
            .await?;
        }
        if instance.kernel_path.is_some() || instance.initramfs_path.is_some() {
            ensure_directory_exists(&unpack_dir)?;
            repack_vendor_boot_image(
                &ctx.avb,
                ctx.artifacts_dir(),
                instance.initramfs_path.as_deref(),
                &instance.vendor_boot_image,
                &instance.new_vendor_boot_image(),
                &unpack_dir,
                instance.bootconfig_supported,
            )
            .await?;
        }
        Ok(())
    }
}

/// Super image rebuilt from a vendor/system target-files pair.
struct SuperImageNode;

#[async_trait]
impl ImageNode for SuperImageNode {
    fn name(&self) -> &'static str {
        "super_image"
    }

    async fn generate(&self, ctx: &PipelineContext) -> Result<(), Status> {
        if !should_rebuild_super_image(
            ctx.default_target_zip.as_deref(),
            ctx.system_target_zip.as_deref(),
        ) {
            return Ok(());
        }
        let (Some(default_zip), Some(system_zip)) =
            (&ctx.default_target_zip, &ctx.system_target_zip)
        else {
            return Ok(());
        };
        let work_dir = ctx.instance.instance_dir.join("super_mix");
        ensure_directory_exists(&work_dir)?;
        rebuild_super_image(
            ctx.artifacts_dir(),
            default_zip,
            system_zip,
            &ctx.instance.new_super_image(),
            &ctx.instance.new_vbmeta_image(),
            &work_dir,
        )
        .await
    }
}

macro_rules! blank_image_node {
    ($(#[$meta:meta])* $node:ident, $name:literal, $path:ident, $size_mb:expr) => {
        $(#[$meta])*
        struct $node;

        #[async_trait]
        impl ImageNode for $node {
            fn name(&self) -> &'static str {
                $name
            }

            async fn generate(&self, ctx: &PipelineContext) -> Result<(), Status> {
                let size_mb = $size_mb(&ctx.instance);
                initialize_blank_image_if_missing(
                    ctx.artifacts_dir(),
                    &ctx.instance.$path(),
                    size_mb,
                )
                .await
            }
        }
    };
}

blank_image_node!(
    /// The misc partition, blank unless it already exists.
    MiscImageNode,
    "misc",
    misc_image_path,
    (|i: &cvd_core::InstanceConfig| i.blank_misc_image_mb)
);
blank_image_node!(
    MetadataImageNode,
    "metadata",
    metadata_image_path,
    (|i: &cvd_core::InstanceConfig| i.blank_metadata_image_mb)
);
blank_image_node!(
    FactoryResetProtectedNode,
    "frp",
    factory_reset_protected_path,
    (|_: &cvd_core::InstanceConfig| 1)
);
blank_image_node!(
    PstoreNode,
    "pstore",
    pstore_path,
    (|_: &cvd_core::InstanceConfig| 2)
);
blank_image_node!(
    AccessKregistryNode,
    "access_kregistry",
    access_kregistry_path,
    (|_: &cvd_core::InstanceConfig| 2)
);
blank_image_node!(
    HwcomposerPmemNode,
    "hwcomposer_pmem",
    hwcomposer_pmem_path,
    (|_: &cvd_core::InstanceConfig| 2)
);

/// Persistent bootconfig partition, only for kernels that read bootconfig.
struct BootConfigPartitionNode;

#[async_trait]
impl ImageNode for BootConfigPartitionNode {
    fn name(&self) -> &'static str {
        "bootconfig"
    }

    async fn generate(&self, ctx: &PipelineContext) -> Result<(), Status> {
        let instance = &ctx.instance;
        if !instance.bootconfig_supported {
            return Ok(());
        }
        let mut bootconfig = String::new();
        for (key, value) in &instance.bootconfig_args {
            bootconfig.push_str(key);
            bootconfig.push('=');
            bootconfig.push_str(value);
            bootconfig.push('\n');
        }
        let path = instance.persistent_bootconfig_path();
        let tmp = path.with_extension("img.tmp");
        let result = async {
            std::fs::write(&tmp, bootconfig.as_bytes())
                .map_err(|e| Status::filesystem(format!("write {}: {e}", tmp.display())))?;
            let size = crate::boot_env::align_to_power_of_2(
                crate::avb::MAX_AVB_METADATA_SIZE + 4096,
                20,
            );
            ctx.avb.add_hash_footer(&tmp, "bootconfig", size).await?;
            cvd_adapters::files::install_if_changed(&tmp, &path)?;
            Ok(())
        }
        .await;
        if result.is_err() {
            cvd_adapters::files::discard_tmp(&tmp);
        }
        result
    }
}

/// Optional SD card image.
struct SdCardNode;

#[async_trait]
impl ImageNode for SdCardNode {
    fn name(&self) -> &'static str {
        "sdcard"
    }

    async fn generate(&self, ctx: &PipelineContext) -> Result<(), Status> {
        let instance = &ctx.instance;
        if instance.blank_sdcard_image_mb == 0 {
            return Ok(());
        }
        let path = instance.sdcard_path();
        if cvd_adapters::files::file_has_content(&path) {
            return Ok(());
        }
        crate::blank_image::create_blank_image(
            ctx.artifacts_dir(),
            &path,
            instance.blank_sdcard_image_mb,
            "sdcard",
        )
        .await
    }
}

/// Userdata shaping per the configured policy.
struct DataImageNode;

#[async_trait]
impl ImageNode for DataImageNode {
    fn name(&self) -> &'static str {
        "data"
    }

    async fn generate(&self, ctx: &PipelineContext) -> Result<(), Status> {
        initialize_data_image(ctx.artifacts_dir(), &ctx.instance).await
    }
}

/// EFI system partitions for flows that boot through one.
struct EspNode;

#[async_trait]
impl ImageNode for EspNode {
    fn name(&self) -> &'static str {
        "esp"
    }

    async fn generate(&self, ctx: &PipelineContext) -> Result<(), Status> {
        initialize_esp_image(&ctx.config, &ctx.instance).await
    }
}

/// Bootloader environment images (OS and, under Grub, the AP VM's).
struct BootEnvNode;

#[async_trait]
impl ImageNode for BootEnvNode {
    fn name(&self) -> &'static str {
        "uboot_env"
    }

    async fn generate(&self, ctx: &PipelineContext) -> Result<(), Status> {
        prepare_boot_env_image(
            &ctx.avb,
            ctx.artifacts_dir(),
            &ctx.instance,
            &ctx.instance.uboot_env_image_path(),
            ctx.config.boot_flow,
        )
        .await?;
        if ctx.config.ap_boot_flow == ApBootFlow::Grub {
            prepare_boot_env_image(
                &ctx.avb,
                ctx.artifacts_dir(),
                &ctx.instance,
                &ctx.instance.ap_uboot_env_image_path(),
                cvd_core::BootFlow::Linux,
            )
            .await?;
        }
        Ok(())
    }
}

/// Persistent vbmeta chaining the env partitions.
struct PersistentVbmetaNode;

#[async_trait]
impl ImageNode for PersistentVbmetaNode {
    fn name(&self) -> &'static str {
        "persistent_vbmeta"
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &["uboot_env", "bootconfig"]
    }

    async fn generate(&self, ctx: &PipelineContext) -> Result<(), Status> {
        generate_persistent_vbmeta(
            &ctx.avb,
            ctx.artifacts_dir(),
            &ctx.instance,
            ctx.config.ap_boot_flow,
        )
        .await
    }
}

/// Pad every referenced vbmeta image to the size the AVB reader expects.
struct VbmetaSizeNode;

#[async_trait]
impl ImageNode for VbmetaSizeNode {
    fn name(&self) -> &'static str {
        "vbmeta_enforce"
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &["super_image"]
    }

    async fn generate(&self, ctx: &PipelineContext) -> Result<(), Status> {
        let instance = &ctx.instance;
        let new_vbmeta = instance.new_vbmeta_image();
        let mut paths = vec![
            instance.vbmeta_image.as_path(),
            instance.vbmeta_system_image.as_path(),
            new_vbmeta.as_path(),
        ];
        if let Some(p) = &instance.vbmeta_vendor_dlkm_image {
            paths.push(p.as_path());
        }
        if let Some(p) = &instance.vbmeta_system_dlkm_image {
            paths.push(p.as_path());
        }
        enforce_minimum_vbmeta_size(&paths)
    }
}

/// Per-instance persistent composite (and the AP one under Grub).
struct InstanceCompositeNode;

#[async_trait]
impl ImageNode for InstanceCompositeNode {
    fn name(&self) -> &'static str {
        "persistent_composite"
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &["uboot_env", "persistent_vbmeta", "frp", "bootconfig"]
    }

    async fn generate(&self, ctx: &PipelineContext) -> Result<(), Status> {
        let instance = &ctx.instance;
        let builder = DiskBuilder::new(
            ctx.config.vm_manager,
            ctx.crosvm_path(),
            instance.persistent_composite_disk_path(),
        )
        .partitions(persistent_composite_disk_config(instance))
        .overlay_path(instance.instance_dir.join("persistent_composite_overlay.img"))
        .resume_if_possible(instance.resume);
        builder.build_composite_disk_if_necessary().await?;
        builder.build_overlay_if_necessary(false).await?;

        if ctx.config.ap_boot_flow == ApBootFlow::Grub {
            let ap_builder = DiskBuilder::new(
                ctx.config.vm_manager,
                ctx.crosvm_path(),
                instance.ap_composite_disk_path(),
            )
            .partitions(persistent_ap_composite_disk_config(instance))
            .overlay_path(instance.instance_dir.join("ap_composite_overlay.img"))
            .resume_if_possible(instance.resume);
            ap_builder.build_composite_disk_if_necessary().await?;
            ap_builder.build_overlay_if_necessary(false).await?;
        }
        Ok(())
    }
}

/// The OS composite disk and its overlay.
struct OsCompositeNode;

#[async_trait]
impl ImageNode for OsCompositeNode {
    fn name(&self) -> &'static str {
        "os_composite"
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &[
            "boot_images",
            "super_image",
            "vbmeta_enforce",
            "misc",
            "metadata",
            "data",
            "esp",
        ]
    }

    async fn generate(&self, ctx: &PipelineContext) -> Result<(), Status> {
        let instance = &ctx.instance;
        let partitions = os_composite_disk_config(&ctx.config, instance);
        if partitions.is_empty() {
            return Ok(());
        }
        let builder = DiskBuilder::new(
            ctx.config.vm_manager,
            ctx.crosvm_path(),
            instance.os_composite_disk_path(),
        )
        .read_only(true)
        .partitions(partitions)
        .overlay_path(instance.overlay_path())
        .resume_if_possible(instance.resume);
        builder.build_composite_disk_if_necessary().await?;
        builder
            .build_overlay_if_necessary(instance.use_overlay)
            .await?;
        Ok(())
    }
}

/// gem5 boot unpacking; a no-op elsewhere.
struct Gem5Node;

#[async_trait]
impl ImageNode for Gem5Node {
    fn name(&self) -> &'static str {
        "gem5"
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &["boot_images", "bootconfig"]
    }

    async fn generate(&self, ctx: &PipelineContext) -> Result<(), Status> {
        if ctx.config.vm_manager != VmmMode::Gem5 {
            return Ok(());
        }
        gem5_image_unpacker(&ctx.config, &ctx.instance).await
    }
}

#[cfg(test)]
#[path = "runner_tests.rs"]
mod tests;
