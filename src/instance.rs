//! Instance creation utils.

use crate::{resolve_names, InstanceCapabilities, MatchSmallVec, ProviderError};
use ash::extensions::ext::DebugUtils;
use ash::{vk, Entry, Instance};
use cstr::cstr;
#[cfg(feature = "surface")]
use raw_window_handle::HasRawDisplayHandle;
use std::{
    ffi::{c_void, CStr, CString, NulError},
    fmt,
    os::raw::c_char,
};
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

/// Require, request or disable validation layers.
#[derive(Debug, Copy, Clone)]
pub enum ValidationLayers {
    /// Instance creation will fail if there are no validation layers installed.
    Require,
    /// If there are validation layers installed, enable them.
    Request,
    /// Don't enable validation layers.
    Disable,
}

/// Enable or disable the debug messenger, optionally providing a custom callback.
#[derive(Copy, Clone)]
pub enum DebugMessengerConfig {
    /// Enables the debug messenger with the [`default_debug_callback`]
    /// callback.
    Default,
    /// Enables the debug messenger with a custom, user-provided callback.
    Custom {
        /// The user provided callback function. Feel free to take a look at the
        /// [`default_debug_callback`] when implementing your own.
        callback: vk::PFN_vkDebugUtilsMessengerCallbackEXT,
        /// A user data pointer passed to the debug callback.
        user_data_pointer: *mut c_void,
    },
    /// Disables the debug messenger.
    Disable,
}

/// The default debug callback used in [`DebugMessengerConfig::Default`].
/// Forwards validation messages into `tracing` at a level matching the
/// message severity.
pub unsafe extern "system" fn default_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut c_void,
) -> vk::Bool32 {
    let message = if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        std::borrow::Cow::from("")
    } else {
        CStr::from_ptr((*p_callback_data).p_message).to_string_lossy()
    };

    if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!(target: "vulkan", kind = ?message_type, "{}", message);
    } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!(target: "vulkan", kind = ?message_type, "{}", message);
    } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        info!(target: "vulkan", kind = ?message_type, "{}", message);
    } else {
        trace!(target: "vulkan", kind = ?message_type, "{}", message);
    }

    vk::FALSE
}

/// Debug reporting support, resolved once during instance creation.
///
/// Whether the platform can report debug messages is decided exactly once, in
/// [`InstanceBuilder::build`]; afterwards callers hold this value instead of
/// re-checking extensions or looking up symbols.
pub enum DebugReporting {
    /// The debug utils extension is enabled and a messenger is registered.
    Available {
        /// Extension loader the messenger was created with.
        loader: DebugUtils,
        /// The registered messenger.
        messenger: vk::DebugUtilsMessengerEXT,
    },
    /// Debug reporting was disabled or the extension is not present.
    Unavailable,
}

impl DebugReporting {
    /// True if a messenger was registered.
    #[inline]
    pub fn is_available(&self) -> bool {
        matches!(self, DebugReporting::Available { .. })
    }

    /// The registered messenger, if any.
    #[inline]
    pub fn messenger(&self) -> Option<vk::DebugUtilsMessengerEXT> {
        match self {
            DebugReporting::Available { messenger, .. } => Some(*messenger),
            DebugReporting::Unavailable => None,
        }
    }

    /// Destroy the messenger, if one was registered. Call before destroying
    /// the instance.
    pub unsafe fn destroy(&self) {
        if let DebugReporting::Available { loader, messenger } = self {
            loader.destroy_debug_utils_messenger(*messenger, None);
        }
    }
}

/// Metadata for after instance creation.
#[derive(Clone)]
pub struct InstanceMetadata {
    instance_handle: vk::Instance,
    api_version: u32,
    enabled_layers: MatchSmallVec<CString>,
    enabled_extensions: MatchSmallVec<CString>,
}

impl InstanceMetadata {
    /// The instance this metadata belongs to.
    #[inline]
    pub fn instance_handle(&self) -> vk::Instance {
        self.instance_handle
    }

    /// Retrieve the used instance API version.
    #[inline]
    pub fn api_version_raw(&self) -> u32 {
        self.api_version
    }

    /// Retrieve the used instance API major version.
    #[inline]
    pub fn api_version_major(&self) -> u32 {
        vk::api_version_major(self.api_version)
    }

    /// Retrieve the used instance API minor version.
    #[inline]
    pub fn api_version_minor(&self) -> u32 {
        vk::api_version_minor(self.api_version)
    }

    /// List of all enabled layers in the instance.
    #[inline]
    pub fn enabled_layers(&self) -> &[CString] {
        &self.enabled_layers
    }

    /// Returns true if `layer` is enabled.
    #[inline]
    pub fn is_layer_enabled(&self, layer: &CStr) -> bool {
        self.enabled_layers.iter().any(|e| e.as_c_str() == layer)
    }

    /// List of all enabled extensions in the instance.
    #[inline]
    pub fn enabled_extensions(&self) -> &[CString] {
        &self.enabled_extensions
    }

    /// Returns true if `extension` is enabled.
    #[inline]
    pub fn is_extension_enabled(&self, extension: &CStr) -> bool {
        self.enabled_extensions
            .iter()
            .any(|e| e.as_c_str() == extension)
    }
}

impl fmt::Debug for InstanceMetadata {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("InstanceMetadata")
            .field(
                "api_version",
                &format_args!("{}.{}", self.api_version_major(), self.api_version_minor()),
            )
            .field("enabled_layers", &self.enabled_layers)
            .field("enabled_extensions", &self.enabled_extensions)
            .finish()
    }
}

/// Errors that can occur during instance creation.
#[derive(Debug, Error)]
pub enum InstanceCreationError {
    /// Vulkan Error.
    #[error("vulkan error")]
    Vulkan(#[from] vk::Result),
    /// A capability query failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),
    /// One or more required layers are not present. Carries every missing
    /// layer, not just the first.
    #[error("layers ({0:?}) not present")]
    LayersNotPresent(MatchSmallVec<CString>),
    /// One or more required extensions are not present. Carries every missing
    /// extension, not just the first.
    #[error("extensions ({0:?}) not present")]
    ExtensionsNotPresent(MatchSmallVec<CString>),
}

/// Explicit configuration for instance creation.
///
/// All toggles — validation layers, debug reporting, api versions, layer and
/// extension requirements — are plain runtime values gathered here and
/// resolved once in [`build`](Self::build). Required capabilities fail
/// creation when absent; requested ones degrade to a warning.
pub struct InstanceBuilder {
    app_name: Option<CString>,
    app_version: Option<u32>,
    engine_name: Option<CString>,
    engine_version: Option<u32>,
    required_api_version: u32,
    requested_api_version: Option<u32>,
    layers: MatchSmallVec<(CString, bool)>,
    extensions: MatchSmallVec<(CString, bool)>,
    debug_messenger: DebugMessengerConfig,
    debug_message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    debug_message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    enabled_validation_features: MatchSmallVec<vk::ValidationFeatureEnableEXT>,
    disabled_validation_features: MatchSmallVec<vk::ValidationFeatureDisableEXT>,
}

impl InstanceBuilder {
    /// Create a new instance builder with opinionated defaults.
    #[inline]
    pub fn new() -> Self {
        InstanceBuilder {
            app_name: None,
            app_version: None,
            engine_name: None,
            engine_version: None,
            required_api_version: vk::API_VERSION_1_0,
            requested_api_version: None,
            layers: MatchSmallVec::new(),
            extensions: MatchSmallVec::new(),
            debug_messenger: DebugMessengerConfig::Disable,
            debug_message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            debug_message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            enabled_validation_features: MatchSmallVec::new(),
            disabled_validation_features: MatchSmallVec::new(),
        }
    }

    /// Application name to advertise.
    #[inline]
    pub fn app_name(mut self, app_name: &str) -> Result<Self, NulError> {
        self.app_name = Some(CString::new(app_name)?);
        Ok(self)
    }

    /// Application version to advertise.
    #[inline]
    pub fn app_version(mut self, major: u32, minor: u32) -> Self {
        self.app_version = Some(vk::make_api_version(0, major, minor, 0));
        self
    }

    /// Application version to advertise.
    #[inline]
    pub fn app_version_raw(mut self, app_version: u32) -> Self {
        self.app_version = Some(app_version);
        self
    }

    /// Engine name to advertise.
    #[inline]
    pub fn engine_name(mut self, engine_name: &str) -> Result<Self, NulError> {
        self.engine_name = Some(CString::new(engine_name)?);
        Ok(self)
    }

    /// Engine version to advertise.
    #[inline]
    pub fn engine_version(mut self, major: u32, minor: u32) -> Self {
        self.engine_version = Some(vk::make_api_version(0, major, minor, 0));
        self
    }

    /// Engine version to advertise.
    #[inline]
    pub fn engine_version_raw(mut self, engine_version: u32) -> Self {
        self.engine_version = Some(engine_version);
        self
    }

    /// Instance API version to be used as minimum requirement.
    #[inline]
    pub fn require_api_version(mut self, major: u32, minor: u32) -> Self {
        self.required_api_version = vk::make_api_version(0, major, minor, 0);
        self
    }

    /// Instance API version to be used as minimum requirement.
    #[inline]
    pub fn require_api_version_raw(mut self, api_version: u32) -> Self {
        self.required_api_version = api_version;
        self
    }

    /// Instance API version to request. If it is not supported, fall back to
    /// the highest supported version.
    #[inline]
    pub fn request_api_version(mut self, major: u32, minor: u32) -> Self {
        self.requested_api_version = Some(vk::make_api_version(0, major, minor, 0));
        self
    }

    /// Instance API version to request. If it is not supported, fall back to
    /// the highest supported version.
    #[inline]
    pub fn request_api_version_raw(mut self, api_version: u32) -> Self {
        self.requested_api_version = Some(api_version);
        self
    }

    /// Try to enable this layer, ignore if it's not supported.
    #[inline]
    pub fn request_layer(mut self, layer: &CStr) -> Self {
        self.layers.push((layer.to_owned(), false));
        self
    }

    /// Enable this layer, fail if it's not supported.
    #[inline]
    pub fn require_layer(mut self, layer: &CStr) -> Self {
        self.layers.push((layer.to_owned(), true));
        self
    }

    /// Try to enable this extension, ignore if it is not supported.
    #[inline]
    pub fn request_extension(mut self, extension: &CStr) -> Self {
        self.extensions.push((extension.to_owned(), false));
        self
    }

    /// Enable this extension, fail if it's not supported.
    #[inline]
    pub fn require_extension(mut self, extension: &CStr) -> Self {
        self.extensions.push((extension.to_owned(), true));
        self
    }

    #[cfg(feature = "surface")]
    /// Adds an requirement on all Vulkan extensions necessary to create a
    /// surface on `display_handle`. You can also manually add these extensions.
    /// Returns `None` if the corresponding Vulkan surface extensions couldn't
    /// be found. This is only supported on feature `surface`.
    #[inline]
    pub fn require_surface_extensions(
        mut self,
        display_handle: &impl HasRawDisplayHandle,
    ) -> Option<Self> {
        let required_extensions =
            ash_window::enumerate_required_extensions(display_handle.raw_display_handle()).ok()?;
        self.extensions.extend(
            required_extensions
                .iter()
                .map(|&name| (unsafe { CStr::from_ptr(name) }.to_owned(), true)),
        );
        Some(self)
    }

    /// Add Khronos validation layers.
    #[inline]
    pub fn validation_layers(mut self, validation_layers: ValidationLayers) -> Self {
        match validation_layers {
            ValidationLayers::Require | ValidationLayers::Request => {
                self.layers.push((
                    cstr!("VK_LAYER_KHRONOS_validation").to_owned(),
                    matches!(validation_layers, ValidationLayers::Require),
                ));

                self.extensions
                    .push((vk::ExtValidationFeaturesFn::name().to_owned(), false));
            }
            ValidationLayers::Disable => (),
        }

        self
    }

    /// Try to create a debug messenger with the config provided by
    /// `debug_messenger`.
    #[inline]
    pub fn request_debug_messenger(mut self, debug_messenger: DebugMessengerConfig) -> Self {
        if !matches!(debug_messenger, DebugMessengerConfig::Disable) {
            self.extensions
                .push((vk::ExtDebugUtilsFn::name().to_owned(), false));
        }

        self.debug_messenger = debug_messenger;
        self
    }

    /// Filter for the severity of debug messages.
    #[inline]
    pub fn debug_message_severity(
        mut self,
        severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    ) -> Self {
        self.debug_message_severity = severity;
        self
    }

    /// Filter for the type of debug messages.
    #[inline]
    pub fn debug_message_type(mut self, ty: vk::DebugUtilsMessageTypeFlagsEXT) -> Self {
        self.debug_message_type = ty;
        self
    }

    /// Enable an additional feature in the validation layers.
    #[inline]
    pub fn enable_validation_feature(
        mut self,
        validation_feature: vk::ValidationFeatureEnableEXT,
    ) -> Self {
        self.enabled_validation_features.push(validation_feature);
        self
    }

    /// Disable a feature in the validation layers.
    #[inline]
    pub fn disable_validation_feature(
        mut self,
        validation_feature: vk::ValidationFeatureDisableEXT,
    ) -> Self {
        self.disabled_validation_features.push(validation_feature);
        self
    }

    /// Returns the [`ash::Instance`], the resolved [`DebugReporting`]
    /// collaborator, and [`InstanceMetadata`] about what is actually enabled
    /// in the instance.
    ///
    /// Both capability catalogs are fetched fresh from `entry` and verified
    /// before creation: missing required layers or extensions fail with the
    /// complete list of misses, while missing requested ones are logged and
    /// dropped from the enable lists.
    pub unsafe fn build(
        self,
        entry: &Entry,
    ) -> Result<(Instance, DebugReporting, InstanceMetadata), InstanceCreationError> {
        let mut required_api_version = self.required_api_version;
        if let Some(requested_api_version) = self.requested_api_version {
            let instance_version = entry
                .try_enumerate_instance_version()?
                .unwrap_or(vk::API_VERSION_1_0);
            required_api_version =
                required_api_version.max(requested_api_version.min(vk::make_api_version(
                    0,
                    vk::api_version_major(instance_version),
                    vk::api_version_minor(instance_version),
                    0,
                )));
        }

        let layer_catalog = entry.instance_layers()?;
        debug!(layers = ?layer_catalog, "installed instance layers");
        let layers = resolve_names(&self.layers, &layer_catalog);
        if !layers.missing_required.is_empty() {
            return Err(InstanceCreationError::LayersNotPresent(
                layers.missing_required,
            ));
        }
        let enabled_layers = layers.enabled;

        // The implementation's own extensions plus whatever the enabled
        // layers provide.
        let mut extension_catalog = entry.instance_extensions(None)?;
        for layer_name in &enabled_layers {
            extension_catalog.extend(entry.instance_extensions(Some(layer_name.as_c_str()))?);
        }
        debug!(extensions = ?extension_catalog, "available instance extensions");
        let extensions = resolve_names(&self.extensions, &extension_catalog);
        if !extensions.missing_required.is_empty() {
            return Err(InstanceCreationError::ExtensionsNotPresent(
                extensions.missing_required,
            ));
        }
        let enabled_extensions = extensions.enabled;

        let is_debug_utils_enabled = enabled_extensions
            .iter()
            .any(|name| name.as_c_str() == vk::ExtDebugUtilsFn::name());
        let is_validation_features_enabled = enabled_extensions
            .iter()
            .any(|name| name.as_c_str() == vk::ExtValidationFeaturesFn::name());

        let mut app_info = vk::ApplicationInfo::builder().api_version(required_api_version);

        let app_name = self.app_name;
        if let Some(val) = app_name.as_ref() {
            app_info = app_info.application_name(val);
        }

        if let Some(app_version) = self.app_version {
            app_info = app_info.application_version(app_version);
        }

        let engine_name = self.engine_name;
        if let Some(val) = engine_name.as_ref() {
            app_info = app_info.engine_name(val);
        }

        if let Some(engine_version) = self.engine_version {
            app_info = app_info.engine_version(engine_version);
        }

        let layer_name_ptrs: MatchSmallVec<*const c_char> =
            enabled_layers.iter().map(|name| name.as_ptr()).collect();
        let extension_name_ptrs: MatchSmallVec<*const c_char> =
            enabled_extensions.iter().map(|name| name.as_ptr()).collect();

        let mut instance_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_layer_names(&layer_name_ptrs)
            .enabled_extension_names(&extension_name_ptrs);

        let messenger_requested = !matches!(self.debug_messenger, DebugMessengerConfig::Disable);
        let messenger_info = (messenger_requested && is_debug_utils_enabled).then(|| {
            let messenger_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
                .message_severity(self.debug_message_severity)
                .message_type(self.debug_message_type);
            match self.debug_messenger {
                DebugMessengerConfig::Default => messenger_info
                    .pfn_user_callback(Some(default_debug_callback))
                    .build(),
                DebugMessengerConfig::Custom {
                    callback,
                    user_data_pointer,
                } => messenger_info
                    .pfn_user_callback(callback)
                    .user_data(user_data_pointer)
                    .build(),
                DebugMessengerConfig::Disable => unreachable!(),
            }
        });

        let mut instance_messenger_info;
        if let Some(messenger_info) = messenger_info {
            instance_messenger_info = messenger_info;
            instance_info = instance_info.push_next(&mut instance_messenger_info);
        }

        let mut validation_features;
        if is_validation_features_enabled {
            validation_features = vk::ValidationFeaturesEXT::builder()
                .enabled_validation_features(&self.enabled_validation_features)
                .disabled_validation_features(&self.disabled_validation_features)
                .build();
            instance_info = instance_info.push_next(&mut validation_features);
        }

        let instance = entry.create_instance(&instance_info, None)?;

        let debug_reporting = match messenger_info {
            Some(messenger_info) => {
                let loader = DebugUtils::new(entry, &instance);
                let messenger = loader.create_debug_utils_messenger(&messenger_info, None)?;
                DebugReporting::Available { loader, messenger }
            }
            None => {
                if messenger_requested {
                    warn!("debug messenger requested but the debug utils extension is unavailable");
                }
                DebugReporting::Unavailable
            }
        };

        let instance_metadata = InstanceMetadata {
            instance_handle: instance.handle(),
            api_version: required_api_version,
            enabled_layers,
            enabled_extensions,
        };

        Ok((instance, debug_reporting, instance_metadata))
    }
}

impl Default for InstanceBuilder {
    fn default() -> Self {
        Self::new()
    }
}
