// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Topic data type descriptors.

use crate::port::PortData;
use std::fmt;
use std::sync::Arc;

/// Type identifier carried in every frame.
///
/// MD5 of the type name, truncated to 14 bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeId([u8; 14]);

impl TypeId {
    /// Create TypeId from type name using MD5
    pub fn from_type_name(type_name: &str) -> Self {
        use md5::{Digest, Md5};
        let mut hasher = Md5::new();
        hasher.update(type_name.as_bytes());
        let result = hasher.finalize();
        let mut bytes = [0u8; 14];
        bytes.copy_from_slice(&result[..14]);
        Self(bytes)
    }

    pub const fn from_bytes(bytes: [u8; 14]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 14] {
        &self.0
    }
}

impl fmt::Debug for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeId(")?;
        for byte in &self.0[..4] {
            write!(f, "{:02x}", byte)?;
        }
        write!(f, "...)")
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Registered topic data type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeDescriptor {
    name: Arc<str>,
    type_id: TypeId,
}

impl TypeDescriptor {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        let name = name.into();
        let type_id = TypeId::from_type_name(&name);
        Self { name, type_id }
    }

    /// Descriptor for a port element type.
    pub fn of<T: PortData>() -> Self {
        Self::new(T::type_name().as_ref())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }
}
