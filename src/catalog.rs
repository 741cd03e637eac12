//! Capability catalogs and the providers they are fetched from.
//!
//! A catalog is an ordered snapshot of what the platform advertises right
//! now: instance layers, instance extensions, physical devices, queue
//! families, device extensions. Catalogs are fetched fresh on every query and
//! owned by the caller; nothing here caches. An empty catalog is a valid
//! answer, not an error.

use ash::vk;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use thiserror::Error;

/// The platform query itself failed.
///
/// This is deliberately a different thing from a capability being absent:
/// absence is reported through [`SubsetReport`](crate::SubsetReport) or an
/// incomplete [`QueueFamilyAssignment`](crate::QueueFamilyAssignment), while a
/// `ProviderError` means the answer could not be obtained at all.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The underlying Vulkan enumeration call failed.
    #[error("capability query failed")]
    Vulkan(#[from] vk::Result),
}

/// Capability flags and queue slot count of one queue family, in the order
/// the provider reported it.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct QueueFamilyInfo {
    /// Capabilities the family advertises.
    pub flags: vk::QueueFlags,
    /// Number of queues that can be created in this family.
    pub queue_count: u32,
}

impl QueueFamilyInfo {
    /// Construct a record from raw parts.
    #[inline]
    pub fn new(flags: vk::QueueFlags, queue_count: u32) -> Self {
        QueueFamilyInfo { flags, queue_count }
    }
}

impl From<vk::QueueFamilyProperties> for QueueFamilyInfo {
    fn from(properties: vk::QueueFamilyProperties) -> Self {
        QueueFamilyInfo {
            flags: properties.queue_flags,
            queue_count: properties.queue_count,
        }
    }
}

/// Platform-reported properties of a candidate device, as consumed by the
/// rating in [`DeviceSelector`](crate::DeviceSelector).
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    /// Human readable device name.
    pub name: String,
    /// Reported device type (discrete, integrated, ...).
    pub device_type: vk::PhysicalDeviceType,
    /// Highest api version the device supports.
    pub api_version: u32,
}

/// Provider of instance-level capability catalogs (layers and extensions).
///
/// Implemented for [`ash::Entry`]; tests implement it in memory.
pub trait InstanceCapabilities {
    /// Enumerate the installed instance layers, in provider order.
    fn instance_layers(&self) -> Result<Vec<CString>, ProviderError>;

    /// Enumerate the available instance extensions, in provider order.
    /// With `layer` set, enumerates the extensions provided by that layer
    /// instead of the implementation's own.
    fn instance_extensions(&self, layer: Option<&CStr>) -> Result<Vec<CString>, ProviderError>;
}

/// Provider of device-level capability catalogs.
///
/// Implemented for [`ash::Instance`] with `Handle = vk::PhysicalDevice`;
/// tests implement it in memory with a plain index handle.
pub trait DeviceCapabilities {
    /// Opaque handle identifying one candidate device.
    type Handle: Copy;

    /// Enumerate the candidate devices, in provider order.
    fn devices(&self) -> Result<Vec<Self::Handle>, ProviderError>;

    /// Properties of one candidate device.
    fn device_info(&self, device: Self::Handle) -> DeviceInfo;

    /// Queue families of one candidate device, in provider order.
    fn queue_families(&self, device: Self::Handle) -> Result<Vec<QueueFamilyInfo>, ProviderError>;

    /// Extensions one candidate device supports, in provider order.
    fn device_extensions(&self, device: Self::Handle) -> Result<Vec<CString>, ProviderError>;
}

/// Vulkan reports names as fixed-size nul-terminated `c_char` arrays.
fn name_to_cstring(raw: &[c_char]) -> CString {
    unsafe { CStr::from_ptr(raw.as_ptr()) }.to_owned()
}

impl InstanceCapabilities for ash::Entry {
    fn instance_layers(&self) -> Result<Vec<CString>, ProviderError> {
        let layers = self.enumerate_instance_layer_properties()?;
        Ok(layers
            .iter()
            .map(|layer| name_to_cstring(&layer.layer_name))
            .collect())
    }

    fn instance_extensions(&self, layer: Option<&CStr>) -> Result<Vec<CString>, ProviderError> {
        let extensions = self.enumerate_instance_extension_properties(layer)?;
        Ok(extensions
            .iter()
            .map(|extension| name_to_cstring(&extension.extension_name))
            .collect())
    }
}

impl DeviceCapabilities for ash::Instance {
    type Handle = vk::PhysicalDevice;

    fn devices(&self) -> Result<Vec<Self::Handle>, ProviderError> {
        Ok(unsafe { self.enumerate_physical_devices() }?)
    }

    fn device_info(&self, device: Self::Handle) -> DeviceInfo {
        let properties = unsafe { self.get_physical_device_properties(device) };
        DeviceInfo {
            name: name_to_cstring(&properties.device_name)
                .to_string_lossy()
                .into_owned(),
            device_type: properties.device_type,
            api_version: properties.api_version,
        }
    }

    fn queue_families(&self, device: Self::Handle) -> Result<Vec<QueueFamilyInfo>, ProviderError> {
        let families = unsafe { self.get_physical_device_queue_family_properties(device) };
        Ok(families.into_iter().map(QueueFamilyInfo::from).collect())
    }

    fn device_extensions(&self, device: Self::Handle) -> Result<Vec<CString>, ProviderError> {
        let extensions = unsafe { self.enumerate_device_extension_properties(device) }?;
        Ok(extensions
            .iter()
            .map(|extension| name_to_cstring(&extension.extension_name))
            .collect())
    }
}
