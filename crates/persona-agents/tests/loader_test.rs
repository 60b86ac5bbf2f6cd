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

mod common;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use common::{late_tracking, loader, TestConstructor};
use persona_agents::{FnConstructor, ModeConstructor};
use persona_core::{ComponentSet, LoadError, ModeId, ResourceKind};
use persona_data::ResourceRegistry;
use persona_infra::{SimulatedHandle, SimulatedProbe};

#[tokio::test(start_paused = true)]
async fn test_concurrent_requests_share_one_construction() -> Result<()> {
    let (loader, _) = loader(4);
    let constructor = Arc::new(TestConstructor::new(Duration::from_millis(50)));
    let dyn_constructor: Arc<dyn ModeConstructor> = constructor.clone();
    let zen = ModeId::new("zen");

    let (first, second) = tokio::join!(
        loader.load(&zen, &dyn_constructor),
        loader.load(&zen, &dyn_constructor)
    );
    let (first, second) = (first?, second?);

    assert_eq!(constructor.calls(), 1);
    assert!(Arc::ptr_eq(&first.set, &second.set));
    assert!(!first.from_cache);
    assert!(!second.from_cache);
    assert_eq!(loader.in_flight_count(), 0);

    let third = loader.load(&zen, &dyn_constructor).await?;
    assert!(third.from_cache);
    assert!(Arc::ptr_eq(&first.set, &third.set));
    assert_eq!(loader.construction_count(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_marker_exists_only_while_constructing() -> Result<()> {
    let (loader, _) = loader(4);
    let constructor: Arc<dyn ModeConstructor> =
        Arc::new(TestConstructor::new(Duration::from_millis(100)));
    let zen = ModeId::new("zen");

    let task = {
        let loader = loader.clone();
        let constructor = constructor.clone();
        let zen = zen.clone();
        tokio::spawn(async move { loader.load(&zen, &constructor).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(loader.is_loading(&zen));
    assert!(!loader.cache().contains(&zen));

    task.await??;
    assert!(!loader.is_loading(&zen));
    assert!(loader.cache().contains(&zen));
    Ok(())
}

#[tokio::test]
async fn test_failed_construction_can_be_retried() -> Result<()> {
    let (loader, _) = loader(4);
    let constructor =
        Arc::new(TestConstructor::new(Duration::ZERO).failing_for(&["zen"], true));
    let dyn_constructor: Arc<dyn ModeConstructor> = constructor.clone();
    let zen = ModeId::new("zen");

    let error = loader.load(&zen, &dyn_constructor).await.unwrap_err();
    assert!(matches!(error, LoadError::Construction { ref mode_id, .. } if *mode_id == zen));
    assert!(!loader.is_loading(&zen));
    assert!(!loader.cache().contains(&zen));

    let retry = loader.load(&zen, &dyn_constructor).await?;
    assert!(!retry.from_cache);
    assert_eq!(constructor.calls(), 2);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_waiters_share_a_failure() {
    let (loader, _) = loader(4);
    let constructor = Arc::new(
        TestConstructor::new(Duration::from_millis(20)).failing_for(&["zen"], false),
    );
    let dyn_constructor: Arc<dyn ModeConstructor> = constructor.clone();
    let zen = ModeId::new("zen");

    let (first, second) = tokio::join!(
        loader.load(&zen, &dyn_constructor),
        loader.load(&zen, &dyn_constructor)
    );
    assert!(first.is_err());
    assert_eq!(first.unwrap_err(), second.unwrap_err());
    assert_eq!(constructor.calls(), 1);
    assert_eq!(loader.in_flight_count(), 0);
}

#[tokio::test]
async fn test_mismatched_mode_is_rejected() {
    let (loader, _) = loader(4);
    let constructor: Arc<dyn ModeConstructor> = Arc::new(FnConstructor(
        |_mode: ModeId, _registry: Arc<ResourceRegistry>| async {
            Ok::<_, anyhow::Error>(ComponentSet::new(ModeId::new("other"), (), ()))
        },
    ));

    let error = loader
        .load(&ModeId::new("zen"), &constructor)
        .await
        .unwrap_err();
    assert_eq!(
        error,
        LoadError::ModeMismatch {
            requested: ModeId::new("zen"),
            returned: ModeId::new("other"),
        }
    );
    assert!(!loader.cache().contains(&ModeId::new("other")));
}

#[tokio::test]
async fn test_panicking_constructor_clears_marker() {
    let (loader, _) = loader(4);
    let constructor: Arc<dyn ModeConstructor> =
        Arc::new(FnConstructor(|mode: ModeId, _registry: Arc<ResourceRegistry>| async move {
            if mode.as_str() == "zen" {
                panic!("scene graph corrupted");
            }
            Ok::<_, anyhow::Error>(ComponentSet::new(mode, (), ()))
        }));
    let zen = ModeId::new("zen");

    let error = loader.load(&zen, &constructor).await.unwrap_err();
    assert!(matches!(error, LoadError::Construction { .. }));
    assert!(!loader.is_loading(&zen));
}

#[tokio::test]
async fn test_shutdown_rejects_new_loads() {
    let (loader, _) = loader(4);
    let constructor: Arc<dyn ModeConstructor> =
        Arc::new(TestConstructor::new(Duration::ZERO));

    loader.shutdown();
    assert!(loader.is_shut_down());
    let result = loader.load(&ModeId::new("zen"), &constructor).await;
    assert_eq!(result.unwrap_err(), LoadError::ShutDown);
}

#[tokio::test]
async fn test_eviction_releases_the_evicted_modes_resources() -> Result<()> {
    let (loader, registry) = loader(1);
    let constructor = Arc::new(TestConstructor::new(Duration::ZERO));
    let dyn_constructor: Arc<dyn ModeConstructor> = constructor.clone();

    loader.load(&ModeId::new("zen"), &dyn_constructor).await?;
    assert!(registry.is_tracked("zen-geometry-0"));

    loader.load(&ModeId::new("hacker"), &dyn_constructor).await?;
    assert!(!loader.cache().contains(&ModeId::new("zen")));
    assert!(!registry.is_tracked("zen-geometry-0"));
    assert!(registry.is_tracked("hacker-geometry-0"));
    assert_eq!(
        constructor.probe.released_labels(),
        vec!["zen-geometry-0".to_string()]
    );
    Ok(())
}

#[tokio::test]
async fn test_failed_construction_releases_its_resources() {
    let (loader, registry) = loader(4);
    let constructor: Arc<dyn ModeConstructor> =
        Arc::new(TestConstructor::new(Duration::ZERO).failing_for(&["zen"], false));

    let error = loader.load(&ModeId::new("zen"), &constructor).await.unwrap_err();
    assert!(matches!(error, LoadError::Construction { .. }));
    assert!(registry.ids_with_prefix("zen-").is_empty());
    assert!(loader.cache().is_empty());
}

#[tokio::test]
async fn test_mismatched_mode_releases_the_requested_modes_resources() {
    let (loader, registry) = loader(4);
    let probe = SimulatedProbe::new();
    let constructor: Arc<dyn ModeConstructor> = {
        let probe = probe.clone();
        Arc::new(FnConstructor(move |mode: ModeId, registry: Arc<ResourceRegistry>| {
            let probe = probe.clone();
            async move {
                let id = mode.resource_id(ResourceKind::Geometry, 0);
                let handle = SimulatedHandle::geometry(id.clone(), vec![256], &probe);
                registry.track(id, Box::new(handle), ResourceKind::Geometry);
                Ok::<_, anyhow::Error>(ComponentSet::new(ModeId::new("other"), (), ()))
            }
        }))
    };

    let error = loader.load(&ModeId::new("zen"), &constructor).await.unwrap_err();
    assert!(matches!(error, LoadError::ModeMismatch { .. }));
    assert!(registry.ids_with_prefix("zen-").is_empty());
    assert_eq!(probe.released_labels(), vec!["zen-geometry-0".to_string()]);
}

#[tokio::test]
async fn test_set_too_large_to_cache_can_still_be_released() -> Result<()> {
    let (loader, registry) = loader(0);
    let constructor: Arc<dyn ModeConstructor> =
        Arc::new(TestConstructor::new(Duration::ZERO));
    let big = ModeId::new("big");

    let outcome = loader.load(&big, &constructor).await?;
    assert!(!outcome.from_cache);
    assert!(!loader.cache().contains(&big));
    assert_eq!(registry.ids_with_prefix("big-"), vec!["big-geometry-0".to_string()]);

    assert!(loader.release(&big));
    assert!(registry.ids_with_prefix("big-").is_empty());
    assert!(!loader.release(&big));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_flush_discards_a_pending_construction() {
    let (loader, registry) = loader(4);
    let probe = SimulatedProbe::new();
    let constructor = late_tracking(Duration::from_millis(100), &probe);
    let zen = ModeId::new("zen");

    let task = {
        let loader = loader.clone();
        let zen = zen.clone();
        tokio::spawn(async move { loader.load(&zen, &constructor).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(loader.is_loading(&zen));
    loader.flush();

    let error = task.await.unwrap().unwrap_err();
    assert_eq!(error, LoadError::Discarded { mode_id: zen.clone() });
    assert!(!loader.cache().contains(&zen));
    assert!(loader.cache().is_empty());
    assert!(registry.ids_with_prefix("zen-").is_empty());
    assert_eq!(probe.released_labels(), vec!["zen-texture-0".to_string()]);
    assert!(!loader.is_loading(&zen));
}

#[tokio::test(start_paused = true)]
async fn test_release_discards_only_that_modes_pending_construction() {
    let (loader, registry) = loader(4);
    let probe = SimulatedProbe::new();
    let constructor = late_tracking(Duration::from_millis(100), &probe);
    let (zen, retro) = (ModeId::new("zen"), ModeId::new("retro"));

    let spawn_load = |mode: &ModeId| {
        let loader = loader.clone();
        let constructor = constructor.clone();
        let mode = mode.clone();
        tokio::spawn(async move { loader.load(&mode, &constructor).await })
    };
    let zen_task = spawn_load(&zen);
    let retro_task = spawn_load(&retro);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(loader.release(&zen));

    assert!(matches!(
        zen_task.await.unwrap(),
        Err(LoadError::Discarded { .. })
    ));
    assert!(retro_task.await.unwrap().is_ok());
    assert!(registry.ids_with_prefix("zen-").is_empty());
    assert!(!loader.cache().contains(&zen));
    assert!(loader.cache().contains(&retro));
    assert_eq!(registry.ids_with_prefix("retro-").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_discards_a_pending_construction() {
    let (loader, registry) = loader(4);
    let constructor: Arc<dyn ModeConstructor> =
        Arc::new(TestConstructor::new(Duration::from_millis(100)));
    let zen = ModeId::new("zen");

    let task = {
        let loader = loader.clone();
        let zen = zen.clone();
        tokio::spawn(async move { loader.load(&zen, &constructor).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(registry.is_tracked("zen-geometry-0"));
    loader.shutdown();

    assert_eq!(task.await.unwrap().unwrap_err(), LoadError::ShutDown);
    assert!(loader.cache().is_empty());
    assert!(registry.ids_with_prefix("zen-").is_empty());
    assert_eq!(loader.in_flight_count(), 0);
}
