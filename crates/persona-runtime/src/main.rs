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

//! Drives the mode runtime through a scripted session.
//!
//! Usage: `persona-runtime [config.json]`. Every mode is built from simulated
//! graphics resources, so the session exercises caching, eviction,
//! preloading and disposal without a GPU. The final stats are printed as
//! JSON on stdout.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use persona_infra::{SimulatedHandle, SimulatedProbe};
use persona_sdk::prelude::*;
use serde_json::json;

const DEFAULT_POPULAR: [&str; 3] = ["zen", "hacker", "retro"];
const SESSION: [&str; 9] = [
    "zen", "hacker", "zen", "cosmic", "retro", "noir", "zen", "hacker", "cosmic",
];

#[derive(Debug)]
struct DemoScene {
    objects: usize,
}

#[derive(Debug)]
struct DemoCharacter {
    rig: String,
    animations: Vec<&'static str>,
}

/// Builds a mode from simulated resources, taking a little longer for
/// richer modes.
struct DemoConstructor {
    probe: Arc<SimulatedProbe>,
}

#[async_trait::async_trait]
impl ModeConstructor for DemoConstructor {
    async fn construct(
        &self,
        mode_id: ModeId,
        registry: Arc<ResourceRegistry>,
    ) -> Result<ComponentSet> {
        let detail = mode_id.as_str().len();
        tokio::time::sleep(Duration::from_millis(20 * detail as u64)).await;

        for n in 0..detail {
            let id = mode_id.resource_id(ResourceKind::Geometry, n);
            let handle =
                SimulatedHandle::geometry(id.clone(), vec![64 * 1024, 16 * 1024], &self.probe);
            registry.track(id, Box::new(handle), ResourceKind::Geometry);
        }

        let textures = (0..2)
            .map(|n| SimulatedHandle::texture(format!("{mode_id}-map-{n}"), 512, 512, &self.probe))
            .collect();
        let material_id = mode_id.resource_id(ResourceKind::Material, 0);
        let material = SimulatedHandle::material(material_id.clone(), textures, &self.probe);
        registry.track(material_id, Box::new(material), ResourceKind::Material);

        let context_id = mode_id.resource_id(ResourceKind::RenderContext, 0);
        let context = SimulatedHandle::render_context(context_id.clone(), &self.probe);
        registry.track(context_id, Box::new(context), ResourceKind::RenderContext);

        let scene = DemoScene { objects: detail };
        let character = DemoCharacter {
            rig: format!("{mode_id}-avatar"),
            animations: vec!["idle", "wave"],
        };
        Ok(ComponentSet::new(mode_id.clone(), scene, character)
            .with_config(json!({ "palette": mode_id.as_str(), "particles": detail * 100 }))
            .with_messages(json!([format!("Welcome to {mode_id} mode")])))
    }
}

fn load_config() -> Result<RuntimeConfig> {
    let mut config = match std::env::args().nth(1) {
        Some(path) => RuntimeConfig::from_file(&path)
            .with_context(|| format!("loading configuration from '{path}'"))?,
        None => RuntimeConfig::default(),
    };
    if config.preload.popular_mode_ids.is_empty() {
        config.preload.popular_mode_ids =
            DEFAULT_POPULAR.iter().map(|m| ModeId::new(*m)).collect();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    use env_logger::{Builder, Env};

    Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = load_config()?;
    let probe = SimulatedProbe::new();
    let constructor = Arc::new(DemoConstructor {
        probe: probe.clone(),
    });
    let runtime = ModeRuntime::builder(constructor).config(config).build()?;
    runtime.start();

    // Give the preloader a head start on the popular modes.
    tokio::time::sleep(runtime.config().preload.start_delay() + Duration::from_millis(200)).await;

    for mode in SESSION {
        match runtime.switch_mode(mode).await {
            Ok(outcome) => {
                let objects = outcome.set.scene::<DemoScene>().map_or(0, |s| s.objects);
                let (rig, animations) = outcome
                    .set
                    .character::<DemoCharacter>()
                    .map_or(("?", 0), |c| (c.rig.as_str(), c.animations.len()));
                log::info!(
                    "Showing '{}': {} objects, rig '{}' with {} animation(s), {} in {:.1}ms",
                    mode,
                    objects,
                    rig,
                    animations,
                    if outcome.from_cache { "cached" } else { "built" },
                    outcome.elapsed_ms
                );
            }
            Err(e) => log::error!("Switch to '{}' failed: {}", mode, e),
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let stats = runtime.stats();
    println!("{}", stats.to_json_pretty()?);

    runtime.shutdown();
    log::info!(
        "Released {} simulated resource(s), {} context loss(es)",
        probe.release_count(),
        probe.context_loss_count()
    );
    Ok(())
}
