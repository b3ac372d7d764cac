//! Volume-based parameter blending.
//!
//! Effects describe their settings as [`VolumeComponent`]s. Scenes place [`Volume`]s
//! holding [`VolumeProfile`]s; every frame the [`VolumeManager`] blends all volumes
//! affecting the camera into a [`VolumeStack`], which passes read their settings from.

mod parameter;

pub use parameter::ClampedFloatParameter;

use glamx::Vec3;
use itertools::Itertools;
use slotmap::{SlotMap, new_key_type};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt::Debug;
use tracing::{debug, trace};

new_key_type! {
    /// Handle to a volume placed in a [`VolumeManager`].
    pub struct HVolume;
}

/// A group of blendable effect settings.
///
/// Blending walks `parameters` of two instances of the same type in lockstep, so both
/// methods have to list the parameters in the same order.
pub trait VolumeComponent: Any + Debug {
    fn parameters(&self) -> Vec<&ClampedFloatParameter>;

    fn parameters_mut(&mut self) -> Vec<&mut ClampedFloatParameter>;

    /// Whether the settings in their current state change anything.
    fn is_active(&self) -> bool;

    /// Where the component is listed when adding overrides to a profile.
    fn menu_path(&self) -> &'static str;
}

fn component_type(component: &dyn VolumeComponent) -> TypeId {
    (component as &dyn Any).type_id()
}

/// A registered component type and how to build its default instance.
#[derive(Copy, Clone, Debug)]
pub struct VolumeComponentInfo {
    pub type_id: TypeId,
    pub type_name: &'static str,
    pub short_name: &'static str,
    pub menu_path: &'static str,
    create: fn() -> Box<dyn VolumeComponent>,
}

impl VolumeComponentInfo {
    pub fn of<C: VolumeComponent + Default>() -> Self {
        let type_name = std::any::type_name::<C>();
        let base_name = type_name.split('<').next().unwrap_or(type_name);
        let short_name = base_name.rsplit("::").next().unwrap_or(base_name);
        Self {
            type_id: TypeId::of::<C>(),
            type_name,
            short_name,
            menu_path: C::default().menu_path(),
            create: || Box::new(C::default()),
        }
    }

    pub fn create_default(&self) -> Box<dyn VolumeComponent> {
        (self.create)()
    }
}

/// Component overrides shared by one or more volumes.
#[derive(Debug, Default)]
pub struct VolumeProfile {
    components: Vec<Box<dyn VolumeComponent>>,
}

impl VolumeProfile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `component`, replacing any existing component of the same type.
    pub fn add<C: VolumeComponent>(&mut self, component: C) {
        self.remove::<C>();
        self.components.push(Box::new(component));
    }

    pub fn with<C: VolumeComponent>(mut self, component: C) -> Self {
        self.add(component);
        self
    }

    pub fn get<C: VolumeComponent>(&self) -> Option<&C> {
        self.components
            .iter()
            .find_map(|c| (&**c as &dyn Any).downcast_ref::<C>())
    }

    pub fn get_mut<C: VolumeComponent>(&mut self) -> Option<&mut C> {
        self.components
            .iter_mut()
            .find_map(|c| (&mut **c as &mut dyn Any).downcast_mut::<C>())
    }

    pub fn has<C: VolumeComponent>(&self) -> bool {
        self.get::<C>().is_some()
    }

    pub fn remove<C: VolumeComponent>(&mut self) -> bool {
        let before = self.components.len();
        self.components
            .retain(|c| component_type(&**c) != TypeId::of::<C>());
        before != self.components.len()
    }

    pub fn components(&self) -> impl Iterator<Item = &dyn VolumeComponent> {
        self.components.iter().map(|c| &**c)
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum VolumeShape {
    /// Affects every camera regardless of position.
    Global,
    /// Axis-aligned box; cameras inside get the full weight.
    Box { center: Vec3, half_extents: Vec3 },
}

#[derive(Debug)]
pub struct Volume {
    pub profile: VolumeProfile,
    pub shape: VolumeShape,
    /// Distance outside a box volume over which its weight fades to zero.
    pub blend_distance: f32,
    pub weight: f32,
    /// Higher priorities are blended later and win over lower ones.
    pub priority: f32,
    pub enabled: bool,
}

impl Volume {
    pub fn global(profile: VolumeProfile) -> Self {
        Self {
            profile,
            shape: VolumeShape::Global,
            blend_distance: 0.0,
            weight: 1.0,
            priority: 0.0,
            enabled: true,
        }
    }

    pub fn local(profile: VolumeProfile, center: Vec3, half_extents: Vec3) -> Self {
        Self {
            shape: VolumeShape::Box {
                center,
                half_extents,
            },
            ..Self::global(profile)
        }
    }

    pub fn with_priority(mut self, priority: f32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_weight(mut self, weight: f32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_blend_distance(mut self, blend_distance: f32) -> Self {
        self.blend_distance = blend_distance;
        self
    }

    /// Blend factor this volume contributes for a camera at `position`.
    pub fn influence(&self, position: Vec3) -> f32 {
        let weight = self.weight.clamp(0.0, 1.0);
        if !self.enabled {
            return 0.0;
        }

        match self.shape {
            VolumeShape::Global => weight,
            VolumeShape::Box {
                center,
                half_extents,
            } => {
                let outside = ((position - center).abs() - half_extents).max(Vec3::ZERO);
                let distance = outside.length();

                if distance <= 0.0 {
                    weight
                } else if distance < self.blend_distance {
                    weight * (1.0 - distance / self.blend_distance)
                } else {
                    0.0
                }
            }
        }
    }
}

/// The blended result of all volumes for one camera.
#[derive(Debug, Default)]
pub struct VolumeStack {
    components: HashMap<TypeId, Box<dyn VolumeComponent>>,
}

impl VolumeStack {
    pub fn get<C: VolumeComponent>(&self) -> Option<&C> {
        let component: &dyn Any = &**self.components.get(&TypeId::of::<C>())?;
        component.downcast_ref::<C>()
    }

    pub fn contains<C: VolumeComponent>(&self) -> bool {
        self.components.contains_key(&TypeId::of::<C>())
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    fn reset(&mut self, registry: &[VolumeComponentInfo]) {
        self.components.clear();
        for info in registry {
            self.components.insert(info.type_id, info.create_default());
        }
    }
}

#[derive(Default)]
pub struct VolumeManager {
    registry: Vec<VolumeComponentInfo>,
    volumes: SlotMap<HVolume, Volume>,
}

impl VolumeManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `C` part of every stack. Registering a type twice has no effect.
    pub fn register_component<C: VolumeComponent + Default>(&mut self) -> VolumeComponentInfo {
        if let Some(info) = self.registry.iter().find(|i| i.type_id == TypeId::of::<C>()) {
            return *info;
        }

        let info = VolumeComponentInfo::of::<C>();
        debug!("Registered volume component {:?} ({})", info.short_name, info.menu_path);
        self.registry.push(info);
        info
    }

    pub fn is_registered<C: VolumeComponent>(&self) -> bool {
        self.registry.iter().any(|i| i.type_id == TypeId::of::<C>())
    }

    pub fn component_infos(&self) -> &[VolumeComponentInfo] {
        &self.registry
    }

    pub fn add_volume(&mut self, volume: Volume) -> HVolume {
        self.volumes.insert(volume)
    }

    pub fn remove_volume(&mut self, volume: HVolume) -> Option<Volume> {
        self.volumes.remove(volume)
    }

    pub fn volume(&self, volume: HVolume) -> Option<&Volume> {
        self.volumes.get(volume)
    }

    pub fn volume_mut(&mut self, volume: HVolume) -> Option<&mut Volume> {
        self.volumes.get_mut(volume)
    }

    pub fn volume_count(&self) -> usize {
        self.volumes.len()
    }

    pub fn create_stack(&self) -> VolumeStack {
        let mut stack = VolumeStack::default();
        stack.reset(&self.registry);
        stack
    }

    /// Resets `stack` to the registered defaults, then blends every volume affecting
    /// `position` on top, lowest priority first.
    #[profiling::function]
    pub fn update(&self, stack: &mut VolumeStack, position: Vec3) {
        stack.reset(&self.registry);

        let volumes = self
            .volumes
            .values()
            .filter(|v| v.enabled)
            .sorted_by(|a, b| a.priority.total_cmp(&b.priority));

        for volume in volumes {
            let influence = volume.influence(position);
            if influence <= 0.0 {
                continue;
            }

            for component in volume.profile.components() {
                let type_id = component_type(component);
                let Some(target) = stack.components.get_mut(&type_id) else {
                    trace!("Skipping unregistered volume component {component:?}");
                    continue;
                };

                for (dst, src) in target
                    .parameters_mut()
                    .into_iter()
                    .zip(component.parameters())
                {
                    if src.overridden() {
                        dst.blend_towards(src.value(), influence);
                    }
                }
            }
        }
    }
}
