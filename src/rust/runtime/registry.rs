// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    interface::Capability,
    types::ObjectHandle,
};
use ::slab::Slab;
use ::std::{
    collections::HashMap,
    sync::Mutex,
};

//======================================================================================================================
// Traits
//======================================================================================================================

/// Directory of object types, instances, and the capability tables they publish.
pub trait Registry: Send + Sync {
    /// Registers a type named `name`. Registering an existing name returns the existing type.
    fn register_type(&self, name: &str) -> Result<ObjectHandle, Fail>;

    /// Registers an instance of type `typ`.
    fn register_instance(&self, typ: ObjectHandle, name: &str) -> Result<ObjectHandle, Fail>;

    /// Publishes `value` under `tag` on `object`, replacing any previous value.
    fn publish_attribute(&self, object: ObjectHandle, tag: &str, value: Capability) -> Result<(), Fail>;

    /// Looks `tag` up on `object`, then on its type.
    fn lookup_attribute(&self, object: ObjectHandle, tag: &str) -> Result<Capability, Fail>;

    /// Withdraws `tag` from `object`.
    fn unpublish(&self, object: ObjectHandle, tag: &str) -> Result<(), Fail>;

    /// Removes `object` and every attribute it publishes.
    fn unregister(&self, object: ObjectHandle) -> Result<(), Fail>;

    /// Type of instance `object`.
    fn type_of(&self, object: ObjectHandle) -> Result<ObjectHandle, Fail>;
}

//======================================================================================================================
// Structures
//======================================================================================================================

/// In-memory [Registry].
///
/// Handles pack a generation number with a slot index, so a stale handle never resolves to a newer object that
/// reuses the slot.
pub struct ObjectRegistry {
    state: Mutex<RegistryState>,
}

struct RegistryState {
    objects: Slab<Entry>,
    types: HashMap<String, ObjectHandle>,
    generation: u32,
}

struct Entry {
    generation: u32,
    name: String,
    /// Type of an instance. None for types.
    parent: Option<ObjectHandle>,
    attributes: HashMap<String, Capability>,
    /// Live instances of a type.
    instances: usize,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl ObjectRegistry {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RegistryState {
                objects: Slab::new(),
                types: HashMap::new(),
                generation: 0,
            }),
        }
    }

    /// Name under which `object` was registered.
    pub fn name_of(&self, object: ObjectHandle) -> Result<String, Fail> {
        let state = self.state.lock()?;
        Ok(state.get(object)?.name.clone())
    }

    /// Number of registered objects, types included.
    pub fn len(&self) -> usize {
        self.state.lock().map(|state| state.objects.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RegistryState {
    fn insert(&mut self, name: &str, parent: Option<ObjectHandle>) -> ObjectHandle {
        self.generation = self.generation.wrapping_add(1);
        let generation: u32 = self.generation;
        let index: usize = self.objects.insert(Entry {
            generation,
            name: name.to_string(),
            parent,
            attributes: HashMap::new(),
            instances: 0,
        });
        ObjectHandle::from(((generation as u64) << 32) | (index as u64))
    }

    fn get(&self, object: ObjectHandle) -> Result<&Entry, Fail> {
        let (index, generation): (usize, u32) = split(object);
        match self.objects.get(index) {
            Some(entry) if entry.generation == generation => Ok(entry),
            _ => Err(no_such_object(object)),
        }
    }

    fn get_mut(&mut self, object: ObjectHandle) -> Result<&mut Entry, Fail> {
        let (index, generation): (usize, u32) = split(object);
        match self.objects.get_mut(index) {
            Some(entry) if entry.generation == generation => Ok(entry),
            _ => Err(no_such_object(object)),
        }
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Default for ObjectRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry for ObjectRegistry {
    fn register_type(&self, name: &str) -> Result<ObjectHandle, Fail> {
        trace!("register_type() name={:?}", name);
        if name.is_empty() {
            return Err(Fail::new(libc::EINVAL, "type name cannot be empty"));
        }
        let mut state = self.state.lock()?;
        if let Some(typ) = state.types.get(name) {
            return Ok(*typ);
        }
        let typ: ObjectHandle = state.insert(name, None);
        state.types.insert(name.to_string(), typ);
        Ok(typ)
    }

    fn register_instance(&self, typ: ObjectHandle, name: &str) -> Result<ObjectHandle, Fail> {
        trace!("register_instance() typ={:?} name={:?}", typ, name);
        if name.is_empty() {
            return Err(Fail::new(libc::EINVAL, "instance name cannot be empty"));
        }
        let mut state = self.state.lock()?;
        let entry: &mut Entry = state.get_mut(typ)?;
        if entry.parent.is_some() {
            let cause: String = format!("object is not a type (object={:?})", typ);
            error!("register_instance(): {}", cause);
            return Err(Fail::new(libc::EINVAL, &cause));
        }
        entry.instances += 1;
        Ok(state.insert(name, Some(typ)))
    }

    fn publish_attribute(&self, object: ObjectHandle, tag: &str, value: Capability) -> Result<(), Fail> {
        trace!("publish_attribute() object={:?} tag={:?}", object, tag);
        let mut state = self.state.lock()?;
        state.get_mut(object)?.attributes.insert(tag.to_string(), value);
        Ok(())
    }

    fn lookup_attribute(&self, object: ObjectHandle, tag: &str) -> Result<Capability, Fail> {
        trace!("lookup_attribute() object={:?} tag={:?}", object, tag);
        let state = self.state.lock()?;
        let entry: &Entry = state.get(object)?;
        if let Some(value) = entry.attributes.get(tag) {
            return Ok(value.clone());
        }
        if let Some(typ) = entry.parent {
            if let Some(value) = state.get(typ)?.attributes.get(tag) {
                return Ok(value.clone());
            }
        }
        let cause: String = format!("attribute not published (object={:?}, tag={:?})", object, tag);
        warn!("lookup_attribute(): {}", cause);
        Err(Fail::new(libc::ENODEV, &cause))
    }

    fn unpublish(&self, object: ObjectHandle, tag: &str) -> Result<(), Fail> {
        trace!("unpublish() object={:?} tag={:?}", object, tag);
        let mut state = self.state.lock()?;
        match state.get_mut(object)?.attributes.remove(tag) {
            Some(_) => Ok(()),
            None => {
                let cause: String = format!("attribute not published (object={:?}, tag={:?})", object, tag);
                warn!("unpublish(): {}", cause);
                Err(Fail::new(libc::ENODEV, &cause))
            },
        }
    }

    fn unregister(&self, object: ObjectHandle) -> Result<(), Fail> {
        trace!("unregister() object={:?}", object);
        let mut state = self.state.lock()?;
        let (parent, instances, name): (Option<ObjectHandle>, usize, String) = {
            let entry: &Entry = state.get(object)?;
            (entry.parent, entry.instances, entry.name.clone())
        };
        if instances > 0 {
            let cause: String = format!("type still has {:?} instances (object={:?})", instances, object);
            error!("unregister(): {}", cause);
            return Err(Fail::new(libc::EBUSY, &cause));
        }
        match parent {
            Some(typ) => state.get_mut(typ)?.instances -= 1,
            None => {
                state.types.remove(&name);
            },
        }
        let (index, _): (usize, u32) = split(object);
        state.objects.remove(index);
        Ok(())
    }

    fn type_of(&self, object: ObjectHandle) -> Result<ObjectHandle, Fail> {
        let state = self.state.lock()?;
        match state.get(object)?.parent {
            Some(typ) => Ok(typ),
            None => {
                let cause: String = format!("object is a type (object={:?})", object);
                warn!("type_of(): {}", cause);
                Err(Fail::new(libc::ENODEV, &cause))
            },
        }
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

fn split(object: ObjectHandle) -> (usize, u32) {
    let raw: u64 = object.into();
    ((raw & 0xffff_ffff) as usize, (raw >> 32) as u32)
}

fn no_such_object(object: ObjectHandle) -> Fail {
    let cause: String = format!("no such object (object={:?})", object);
    warn!("ObjectRegistry: {}", cause);
    Fail::new(libc::ENODEV, &cause)
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
