// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A headless graphics backend.
//!
//! Simulated handles allocate nothing. They describe themselves like real
//! resources and record every release in a shared [`SimulatedProbe`], which
//! makes them suitable for demos and for asserting disposal behaviour.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{anyhow, bail};
use persona_core::{GraphicsHandle, ResourceShape};

/// Records what happened to a family of simulated handles.
#[derive(Debug, Default)]
pub struct SimulatedProbe {
    releases: AtomicUsize,
    context_losses: AtomicUsize,
    released: Mutex<Vec<String>>,
}

impl SimulatedProbe {
    /// Creates a shared probe.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Successful releases so far.
    pub fn release_count(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    /// Context losses so far.
    pub fn context_loss_count(&self) -> usize {
        self.context_losses.load(Ordering::SeqCst)
    }

    /// Labels of released handles, in release order.
    pub fn released_labels(&self) -> Vec<String> {
        self.released
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Failure modes a simulated handle can be configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulatedFailure {
    /// `shape()` returns an error.
    Shape,
    /// `release()` returns an error.
    Release,
    /// `release()` panics.
    ReleasePanic,
}

/// A simulated graphics resource.
#[derive(Debug)]
pub struct SimulatedHandle {
    label: String,
    shape: ResourceShape,
    owned: Vec<SimulatedHandle>,
    failure: Option<SimulatedFailure>,
    released: bool,
    probe: Arc<SimulatedProbe>,
}

impl SimulatedHandle {
    fn new(label: impl Into<String>, shape: ResourceShape, probe: &Arc<SimulatedProbe>) -> Self {
        Self {
            label: label.into(),
            shape,
            owned: Vec::new(),
            failure: None,
            released: false,
            probe: probe.clone(),
        }
    }

    /// Geometry with the given buffer sizes.
    pub fn geometry(
        label: impl Into<String>,
        buffer_bytes: Vec<u64>,
        probe: &Arc<SimulatedProbe>,
    ) -> Self {
        Self::new(label, ResourceShape::Geometry { buffer_bytes }, probe)
    }

    /// An RGBA8 texture.
    pub fn texture(
        label: impl Into<String>,
        width: u32,
        height: u32,
        probe: &Arc<SimulatedProbe>,
    ) -> Self {
        let shape = ResourceShape::Texture {
            dimensions: Some((width, height)),
            bytes_per_pixel: 4,
        };
        Self::new(label, shape, probe)
    }

    /// A material owning the given textures.
    pub fn material(
        label: impl Into<String>,
        textures: Vec<SimulatedHandle>,
        probe: &Arc<SimulatedProbe>,
    ) -> Self {
        let shape = ResourceShape::Material {
            texture_count: textures.len(),
        };
        let mut material = Self::new(label, shape, probe);
        material.owned = textures;
        material
    }

    /// A render context owning a drawing surface.
    pub fn render_context(label: impl Into<String>, probe: &Arc<SimulatedProbe>) -> Self {
        let label = label.into();
        let surface = Self::texture(format!("{label}/surface"), 1280, 720, probe);
        let mut context = Self::new(label, ResourceShape::RenderContext, probe);
        context.owned.push(surface);
        context
    }

    /// Makes the handle misbehave.
    pub fn with_failure(mut self, failure: SimulatedFailure) -> Self {
        self.failure = Some(failure);
        self
    }

    /// The handle's label.
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl GraphicsHandle for SimulatedHandle {
    fn shape(&self) -> anyhow::Result<ResourceShape> {
        if self.failure == Some(SimulatedFailure::Shape) {
            bail!("simulated shape query failure for '{}'", self.label);
        }
        Ok(self.shape.clone())
    }

    fn release(&mut self) -> anyhow::Result<()> {
        match self.failure {
            Some(SimulatedFailure::Release) => {
                return Err(anyhow!("simulated release failure for '{}'", self.label))
            }
            Some(SimulatedFailure::ReleasePanic) => {
                panic!("simulated release panic for '{}'", self.label)
            }
            _ => {}
        }
        if self.released {
            bail!("'{}' released twice", self.label);
        }
        self.released = true;
        self.probe.releases.fetch_add(1, Ordering::SeqCst);
        self.probe
            .released
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(self.label.clone());
        log::trace!("SimulatedHandle: released '{}'", self.label);
        Ok(())
    }

    fn take_owned(&mut self) -> Vec<Box<dyn GraphicsHandle>> {
        self.owned
            .drain(..)
            .map(|handle| Box::new(handle) as Box<dyn GraphicsHandle>)
            .collect()
    }

    fn lose_context(&mut self) -> anyhow::Result<()> {
        self.probe.context_losses.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
