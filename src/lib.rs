#![allow(clippy::missing_safety_doc)]
#![warn(missing_docs)]
/*!
Capability matching and device selection helpers for [`ash`].

Vulkan setup is mostly a sequence of "does the platform have what I need?"
questions: are the window system's instance extensions available, are the
validation layers installed, does any physical device expose a graphics-capable
queue family. This crate answers those questions with one small core and wraps
it in bootstrap builders:

- ✅ Capability catalogs fetched from pluggable providers
- ✅ Subset verification with 1:1 matching and full miss reporting
- ✅ Queue family selection by capability category
- ✅ Physical device rating and selection
- ✅ Instance and device creation driven by the above

Negative answers are first-class results, never errors: a missing capability
comes back as an unmatched identifier or an incomplete assignment, and only
the caller decides whether that is fatal. Errors are reserved for the platform
query itself failing.

## Cargo Features

- `surface` (enabled by default): Enables the use of [`raw-window-handle`] to
  pull the window system's required instance extensions into verification.

## Example

```rust,ignore
let entry = unsafe { ash::Entry::load() }?;
let instance_builder = InstanceBuilder::new()
    .validation_layers(ValidationLayers::Request)
    .request_debug_messenger(DebugMessengerConfig::Default)
    .require_surface_extensions(&window)
    .unwrap();
let (instance, debug_reporting, instance_metadata) =
    unsafe { instance_builder.build(&entry) }?;

let device_builder = DeviceBuilder::new()
    .queue_category(QueueCategory::GRAPHICS)
    .queue_category(QueueCategory::TRANSFER);
let (device, device_metadata) =
    unsafe { device_builder.build(&instance, &instance_metadata) }?;
let (graphics_queue, graphics_family) = device_metadata
    .device_queue(&device, QueueCategory::GRAPHICS)
    .unwrap();
```

The matching core is usable on its own, without touching a Vulkan loader:

```rust
use ash_capmatch::{verify_subset, ConsumePolicy};

let catalog = ["VK_KHR_surface", "VK_KHR_xcb_surface"];
let report = verify_subset(&["VK_KHR_surface"], &catalog, ConsumePolicy::Exclusive);
assert!(report.all_present());
```

[`raw-window-handle`]: https://crates.io/crates/raw-window-handle
*/

pub mod catalog;
pub mod device;
pub mod instance;
pub mod queues;
pub mod verify;

pub use catalog::*;
pub use device::*;
pub use instance::*;
pub use queues::*;
pub use verify::*;

type MatchSmallVec<T> = smallvec::SmallVec<[T; 8]>;
