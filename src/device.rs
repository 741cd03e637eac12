//! Device rating, selection and creation.

use crate::{
    assign_queue_families, resolve_names, DeviceCapabilities, DeviceInfo, InstanceMetadata,
    MatchSmallVec, ProviderError, QueueCategory, QueueFamilyAssignment, QueueFamilyInfo,
};
use ash::{vk, Device, Instance};
use std::{
    ffi::{CStr, CString},
    os::raw::c_char,
};
use thiserror::Error;
use tracing::debug;

/// Errors that can occur while selecting a physical device.
#[derive(Debug, Error)]
pub enum SelectionError {
    /// A capability query failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),
    /// No candidate device satisfied every requirement.
    #[error("no physical device met the requirements")]
    NoSuitableDevice,
}

/// Errors that can occur during device creation.
#[derive(Debug, Error)]
pub enum DeviceCreationError {
    /// Vulkan Error.
    #[error("vulkan error")]
    Vulkan(#[from] vk::Result),
    /// Device selection failed before anything was created.
    #[error(transparent)]
    Selection(#[from] SelectionError),
    /// Every rated candidate failed device creation.
    #[error("no physical device met the requirements")]
    RequirementsNotMet,
}

/// One suitable candidate device together with everything selection learned
/// about it.
#[derive(Debug, Clone)]
pub struct RatedDevice<H> {
    /// Provider handle for the device.
    pub handle: H,
    /// Platform-reported properties.
    pub info: DeviceInfo,
    /// Suitability score; higher is better. Only suitable devices are rated,
    /// so this is never the "unsuitable" zero.
    pub score: u32,
    /// Queue family index per required category.
    pub queue_assignment: QueueFamilyAssignment,
    /// The device's queue family catalog, as fetched during rating.
    pub queue_families: Vec<QueueFamilyInfo>,
    /// Extensions that are supported and should be enabled on the device.
    pub enabled_extensions: MatchSmallVec<CString>,
}

/// Requirements and preferences for choosing a physical device.
///
/// An explicit configuration struct: build it up, then run
/// [`rate`](Self::rate) or [`select`](Self::select) against a
/// [`DeviceCapabilities`] provider. Selection is deterministic for identical
/// provider output; on equal scores the first-encountered device wins.
#[derive(Debug, Clone)]
pub struct DeviceSelector {
    categories: MatchSmallVec<QueueCategory>,
    extensions: MatchSmallVec<(CString, bool)>,
    device_type_priority: MatchSmallVec<vk::PhysicalDeviceType>,
    required_version: u32,
}

impl DeviceSelector {
    /// Create an empty selector. With no requirements added, every device is
    /// suitable and only the score decides.
    #[inline]
    pub fn new() -> Self {
        DeviceSelector {
            categories: MatchSmallVec::new(),
            extensions: MatchSmallVec::new(),
            device_type_priority: MatchSmallVec::new(),
            required_version: vk::API_VERSION_1_0,
        }
    }

    /// Require a queue family satisfying `category`. Categories are tracked
    /// independently; one family may end up serving several of them.
    #[inline]
    pub fn queue_category(mut self, category: QueueCategory) -> Self {
        self.categories.push(category);
        self
    }

    /// Require a device which supports `extension`. The extension will be
    /// enabled.
    #[inline]
    pub fn require_extension(mut self, extension: &CStr) -> Self {
        self.extensions.push((extension.to_owned(), true));
        self
    }

    /// Prefer a device which supports `extension`. The extension will only be
    /// enabled where it's supported; a miss merely lowers the device's score.
    #[inline]
    pub fn request_extension(mut self, extension: &CStr) -> Self {
        self.extensions.push((extension.to_owned(), false));
        self
    }

    /// Prioritise devices of these types when scoring. The further ahead in
    /// the slice, the higher the weight; unlisted types rank below all listed
    /// ones. Without this, discrete GPUs rank highest.
    #[inline]
    pub fn prioritise_device_types(mut self, types: &[vk::PhysicalDeviceType]) -> Self {
        self.device_type_priority = types.into();
        self
    }

    /// Require the device to support this api version.
    #[inline]
    pub fn require_version(self, major: u32, minor: u32) -> Self {
        self.require_version_raw(vk::make_api_version(0, major, minor, 0))
    }

    /// Require the device to support this api version.
    #[inline]
    pub fn require_version_raw(mut self, version: u32) -> Self {
        self.required_version = version;
        self
    }

    /// Rate every candidate device, in provider order, keeping only the
    /// suitable ones.
    ///
    /// A candidate is dropped when its api version is below the required one,
    /// when any required queue category finds no family, or when a required
    /// extension is unsupported. Rejections are logged at debug level and are
    /// not errors; only a failing capability query is.
    pub fn rate<P>(&self, provider: &P) -> Result<Vec<RatedDevice<P::Handle>>, SelectionError>
    where
        P: DeviceCapabilities,
    {
        let mut rated = Vec::new();
        for handle in provider.devices()? {
            let info = provider.device_info(handle);

            if self.required_version > info.api_version {
                debug!(device = %info.name, "rejected: api version below requirement");
                continue;
            }

            let queue_families = provider.queue_families(handle)?;
            let queue_assignment =
                assign_queue_families(queue_families.iter().copied(), &self.categories);
            if !queue_assignment.is_complete() {
                let missing: Vec<_> = queue_assignment.missing().collect();
                debug!(device = %info.name, ?missing, "rejected: queue categories unsatisfied");
                continue;
            }

            let (enabled_extensions, extension_breadth) = if self.extensions.is_empty() {
                (MatchSmallVec::new(), 0)
            } else {
                let catalog = provider.device_extensions(handle)?;
                let resolved = resolve_names(&self.extensions, &catalog);
                if !resolved.missing_required.is_empty() {
                    let missing = resolved.missing_required;
                    debug!(device = %info.name, ?missing, "rejected: required extensions unsupported");
                    continue;
                }
                (resolved.enabled, catalog.len())
            };

            let score = self.score(&info, enabled_extensions.len(), extension_breadth);
            rated.push(RatedDevice {
                handle,
                info,
                score,
                queue_assignment,
                queue_families,
                enabled_extensions,
            });
        }

        Ok(rated)
    }

    /// Select the highest-scoring suitable device. On equal scores the device
    /// the provider reported first wins.
    pub fn select<P>(&self, provider: &P) -> Result<RatedDevice<P::Handle>, SelectionError>
    where
        P: DeviceCapabilities,
    {
        let mut best: Option<RatedDevice<P::Handle>> = None;
        for candidate in self.rate(provider)? {
            match &best {
                Some(current) if candidate.score <= current.score => {}
                _ => best = Some(candidate),
            }
        }

        best.ok_or(SelectionError::NoSuitableDevice)
    }

    /// Suitability score for a device that already passed every hard
    /// requirement. The weights are defaults to retune, not a contract.
    fn score(&self, info: &DeviceInfo, enabled_extensions: usize, extension_breadth: usize) -> u32 {
        let type_weight = if self.device_type_priority.is_empty() {
            match info.device_type {
                vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
                vk::PhysicalDeviceType::INTEGRATED_GPU => 500,
                vk::PhysicalDeviceType::VIRTUAL_GPU => 250,
                vk::PhysicalDeviceType::CPU => 100,
                _ => 0,
            }
        } else {
            match self
                .device_type_priority
                .iter()
                .position(|&preference| preference == info.device_type)
            {
                Some(position) => (self.device_type_priority.len() - position) as u32 * 1000,
                None => 0,
            }
        };

        type_weight
            + enabled_extensions as u32 * 50
            + extension_breadth.min(64) as u32
            + vk::api_version_minor(info.api_version) * 10
    }
}

impl Default for DeviceSelector {
    fn default() -> Self {
        Self::new()
    }
}

/// Metadata for after device creation.
#[derive(Debug, Clone)]
pub struct DeviceMetadata {
    device_handle: vk::Device,
    physical_device: vk::PhysicalDevice,
    info: DeviceInfo,
    score: u32,
    queue_assignment: QueueFamilyAssignment,
    queue_families: Vec<QueueFamilyInfo>,
    enabled_extensions: MatchSmallVec<CString>,
}

impl DeviceMetadata {
    /// The device this metadata belongs to.
    #[inline]
    pub fn device_handle(&self) -> vk::Device {
        self.device_handle
    }

    /// The physical device this device was created on.
    #[inline]
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Platform-reported properties of the chosen device.
    #[inline]
    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    /// Name of the chosen device.
    #[inline]
    pub fn device_name(&self) -> &str {
        &self.info.name
    }

    /// The score the chosen device was selected with.
    #[inline]
    pub fn score(&self) -> u32 {
        self.score
    }

    /// Queue family indices per required category.
    #[inline]
    pub fn queue_assignment(&self) -> &QueueFamilyAssignment {
        &self.queue_assignment
    }

    /// The queue family catalog of the chosen device.
    #[inline]
    pub fn queue_families(&self) -> &[QueueFamilyInfo] {
        &self.queue_families
    }

    /// List of all enabled extensions on the device.
    #[inline]
    pub fn enabled_extensions(&self) -> &[CString] {
        &self.enabled_extensions
    }

    /// Returns true if `extension` is enabled.
    #[inline]
    pub fn is_extension_enabled(&self, extension: &CStr) -> bool {
        self.enabled_extensions
            .iter()
            .any(|enabled| enabled.as_c_str() == extension)
    }

    /// Returns the queue serving `category` and the index of its family.
    /// `None` if the category was never required or the queue is unavailable.
    pub fn device_queue(
        &self,
        device: &Device,
        category: QueueCategory,
    ) -> Option<(vk::Queue, u32)> {
        self.queue_assignment.index_of(category).and_then(|family| {
            let handle = unsafe { device.get_device_queue(family, 0) };
            (handle != vk::Queue::null()).then_some((handle, family))
        })
    }
}

/// Builds an [`ash::Device`] on the best-rated physical device, with one
/// queue per distinct assigned family.
pub struct DeviceBuilder<'a> {
    selector: DeviceSelector,
    required_features: Option<&'a vk::PhysicalDeviceFeatures2>,
}

impl<'a> DeviceBuilder<'a> {
    /// Create a new device builder.
    #[inline]
    pub fn new() -> Self {
        DeviceBuilder {
            selector: DeviceSelector::new(),
            required_features: None,
        }
    }

    /// Create a device builder around an already-configured selector.
    #[inline]
    pub fn with_selector(selector: DeviceSelector) -> Self {
        DeviceBuilder {
            selector,
            required_features: None,
        }
    }

    /// Require a queue family satisfying `category`.
    #[inline]
    pub fn queue_category(mut self, category: QueueCategory) -> Self {
        self.selector = self.selector.queue_category(category);
        self
    }

    /// Require a device which supports `extension`. The extension will be
    /// enabled.
    #[inline]
    pub fn require_extension(mut self, extension: &CStr) -> Self {
        self.selector = self.selector.require_extension(extension);
        self
    }

    /// Prefer a device which supports `extension`.
    #[inline]
    pub fn request_extension(mut self, extension: &CStr) -> Self {
        self.selector = self.selector.request_extension(extension);
        self
    }

    /// Prioritise devices of these types when scoring.
    #[inline]
    pub fn prioritise_device_types(mut self, types: &[vk::PhysicalDeviceType]) -> Self {
        self.selector = self.selector.prioritise_device_types(types);
        self
    }

    /// Require the device to support this api version.
    #[inline]
    pub fn require_version(mut self, major: u32, minor: u32) -> Self {
        self.selector = self.selector.require_version(major, minor);
        self
    }

    /// Require these features to be present for the device. The features will
    /// be enabled.
    #[inline]
    pub fn require_features(mut self, features: &'a vk::PhysicalDeviceFeatures2) -> Self {
        self.required_features = Some(features);
        self
    }

    /// Select the best physical device and create a logical device on it.
    ///
    /// Candidates are tried best-score first; a candidate whose feature set
    /// turns out to be insufficient (`ERROR_FEATURE_NOT_PRESENT`) is skipped
    /// in favour of the next one.
    pub unsafe fn build(
        self,
        instance: &Instance,
        instance_metadata: &InstanceMetadata,
    ) -> Result<(Device, DeviceMetadata), DeviceCreationError> {
        assert_eq!(instance.handle(), instance_metadata.instance_handle());

        let mut candidates = self.selector.rate(instance)?;
        // sort_by is stable, so equal scores keep provider order
        candidates.sort_by(|a, b| b.score.cmp(&a.score));

        let features2_supported = instance_metadata.api_version_raw() >= vk::API_VERSION_1_1
            || instance_metadata
                .is_extension_enabled(vk::KhrGetPhysicalDeviceProperties2Fn::name());

        let queue_priorities = [1.0f32];
        for candidate in candidates {
            let queue_create_infos: MatchSmallVec<_> = candidate
                .queue_assignment
                .family_indices()
                .into_iter()
                .map(|family| {
                    vk::DeviceQueueCreateInfo::builder()
                        .queue_family_index(family)
                        .queue_priorities(&queue_priorities)
                        .build()
                })
                .collect();

            let extension_name_ptrs: MatchSmallVec<*const c_char> = candidate
                .enabled_extensions
                .iter()
                .map(|name| name.as_ptr())
                .collect();

            let mut device_info = vk::DeviceCreateInfo::builder()
                .queue_create_infos(&queue_create_infos)
                .enabled_extension_names(&extension_name_ptrs);

            let mut required_features;
            if let Some(&features) = self.required_features {
                required_features = features;
                if features2_supported {
                    device_info = device_info.push_next(&mut required_features);
                } else {
                    device_info = device_info.enabled_features(&required_features.features);
                }
            }

            match instance.create_device(candidate.handle, &device_info, None) {
                Ok(device) => {
                    let metadata = DeviceMetadata {
                        device_handle: device.handle(),
                        physical_device: candidate.handle,
                        info: candidate.info,
                        score: candidate.score,
                        queue_assignment: candidate.queue_assignment,
                        queue_families: candidate.queue_families,
                        enabled_extensions: candidate.enabled_extensions,
                    };

                    return Ok((device, metadata));
                }
                Err(vk::Result::ERROR_FEATURE_NOT_PRESENT) => continue,
                Err(err) => return Err(err.into()),
            }
        }

        Err(DeviceCreationError::RequirementsNotMet)
    }
}

impl<'a> Default for DeviceBuilder<'a> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cstr::cstr;

    struct MockDevice {
        info: DeviceInfo,
        families: Vec<QueueFamilyInfo>,
        extensions: Vec<CString>,
    }

    struct MockProvider {
        devices: Vec<MockDevice>,
        fail_queue_query: bool,
    }

    impl MockProvider {
        fn new(devices: Vec<MockDevice>) -> Self {
            MockProvider {
                devices,
                fail_queue_query: false,
            }
        }
    }

    impl DeviceCapabilities for MockProvider {
        type Handle = usize;

        fn devices(&self) -> Result<Vec<usize>, ProviderError> {
            Ok((0..self.devices.len()).collect())
        }

        fn device_info(&self, device: usize) -> DeviceInfo {
            self.devices[device].info.clone()
        }

        fn queue_families(&self, device: usize) -> Result<Vec<QueueFamilyInfo>, ProviderError> {
            if self.fail_queue_query {
                return Err(ProviderError::Vulkan(
                    vk::Result::ERROR_INITIALIZATION_FAILED,
                ));
            }
            Ok(self.devices[device].families.clone())
        }

        fn device_extensions(&self, device: usize) -> Result<Vec<CString>, ProviderError> {
            Ok(self.devices[device].extensions.clone())
        }
    }

    fn mock_device(name: &str, device_type: vk::PhysicalDeviceType) -> MockDevice {
        MockDevice {
            info: DeviceInfo {
                name: name.to_owned(),
                device_type,
                api_version: vk::API_VERSION_1_0,
            },
            families: vec![QueueFamilyInfo::new(
                vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
                1,
            )],
            extensions: Vec::new(),
        }
    }

    #[test]
    fn discrete_gpu_outranks_integrated() {
        let provider = MockProvider::new(vec![
            mock_device("igpu", vk::PhysicalDeviceType::INTEGRATED_GPU),
            mock_device("dgpu", vk::PhysicalDeviceType::DISCRETE_GPU),
        ]);

        let selected = DeviceSelector::new()
            .queue_category(QueueCategory::GRAPHICS)
            .select(&provider)
            .unwrap();
        assert_eq!(selected.handle, 1);
        assert_eq!(selected.info.name, "dgpu");
    }

    #[test]
    fn equal_scores_keep_the_first_device() {
        let provider = MockProvider::new(vec![
            mock_device("first", vk::PhysicalDeviceType::INTEGRATED_GPU),
            mock_device("second", vk::PhysicalDeviceType::INTEGRATED_GPU),
        ]);

        let selected = DeviceSelector::new()
            .queue_category(QueueCategory::GRAPHICS)
            .select(&provider)
            .unwrap();
        assert_eq!(selected.handle, 0);
    }

    #[test]
    fn incomplete_queue_assignment_rejects_the_device() {
        let mut compute_only = mock_device("compute", vk::PhysicalDeviceType::DISCRETE_GPU);
        compute_only.families = vec![QueueFamilyInfo::new(vk::QueueFlags::COMPUTE, 1)];
        let provider = MockProvider::new(vec![
            compute_only,
            mock_device("graphics", vk::PhysicalDeviceType::CPU),
        ]);

        let selected = DeviceSelector::new()
            .queue_category(QueueCategory::GRAPHICS)
            .select(&provider)
            .unwrap();
        // The stronger device lacks a graphics family, so the weaker one wins.
        assert_eq!(selected.handle, 1);
    }

    #[test]
    fn missing_required_extension_rejects_the_device() {
        let provider = MockProvider::new(vec![mock_device(
            "bare",
            vk::PhysicalDeviceType::DISCRETE_GPU,
        )]);

        let result = DeviceSelector::new()
            .queue_category(QueueCategory::GRAPHICS)
            .require_extension(cstr!("VK_KHR_swapchain"))
            .select(&provider);
        assert!(matches!(result, Err(SelectionError::NoSuitableDevice)));
    }

    #[test]
    fn requested_extension_support_breaks_ties() {
        let mut with_extension = mock_device("with", vk::PhysicalDeviceType::INTEGRATED_GPU);
        with_extension.extensions = vec![CString::new("VK_KHR_swapchain").unwrap()];
        let provider = MockProvider::new(vec![
            mock_device("without", vk::PhysicalDeviceType::INTEGRATED_GPU),
            with_extension,
        ]);

        let selected = DeviceSelector::new()
            .queue_category(QueueCategory::GRAPHICS)
            .request_extension(cstr!("VK_KHR_swapchain"))
            .select(&provider)
            .unwrap();
        assert_eq!(selected.handle, 1);
        assert!(selected
            .enabled_extensions
            .iter()
            .any(|name| name.as_c_str() == cstr!("VK_KHR_swapchain")));
    }

    #[test]
    fn requested_extension_miss_is_not_fatal() {
        let provider = MockProvider::new(vec![mock_device(
            "bare",
            vk::PhysicalDeviceType::DISCRETE_GPU,
        )]);

        let selected = DeviceSelector::new()
            .queue_category(QueueCategory::GRAPHICS)
            .request_extension(cstr!("VK_KHR_swapchain"))
            .select(&provider)
            .unwrap();
        assert!(selected.enabled_extensions.is_empty());
    }

    #[test]
    fn api_version_gate_rejects_old_devices() {
        let mut old = mock_device("old", vk::PhysicalDeviceType::DISCRETE_GPU);
        old.info.api_version = vk::API_VERSION_1_0;
        let mut new = mock_device("new", vk::PhysicalDeviceType::CPU);
        new.info.api_version = vk::API_VERSION_1_2;
        let provider = MockProvider::new(vec![old, new]);

        let selected = DeviceSelector::new()
            .queue_category(QueueCategory::GRAPHICS)
            .require_version(1, 1)
            .select(&provider)
            .unwrap();
        assert_eq!(selected.handle, 1);
    }

    #[test]
    fn device_type_priority_overrides_the_default_ladder() {
        let provider = MockProvider::new(vec![
            mock_device("dgpu", vk::PhysicalDeviceType::DISCRETE_GPU),
            mock_device("cpu", vk::PhysicalDeviceType::CPU),
        ]);

        let selected = DeviceSelector::new()
            .queue_category(QueueCategory::GRAPHICS)
            .prioritise_device_types(&[vk::PhysicalDeviceType::CPU])
            .select(&provider)
            .unwrap();
        assert_eq!(selected.handle, 1);
    }

    #[test]
    fn provider_failure_is_an_error_not_a_miss() {
        let mut provider = MockProvider::new(vec![mock_device(
            "gpu",
            vk::PhysicalDeviceType::DISCRETE_GPU,
        )]);
        provider.fail_queue_query = true;

        let result = DeviceSelector::new()
            .queue_category(QueueCategory::GRAPHICS)
            .select(&provider);
        assert!(matches!(result, Err(SelectionError::Provider(_))));
    }

    #[test]
    fn empty_device_catalog_finds_nothing() {
        let provider = MockProvider::new(Vec::new());
        let result = DeviceSelector::new().select(&provider);
        assert!(matches!(result, Err(SelectionError::NoSuitableDevice)));
    }
}
