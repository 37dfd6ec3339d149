//! Location sampling and fence-crossing detection.
//!
//! The evaluator is stateless between samples: the member's previous side of
//! each fence is recomputed from the previously stored sample, so a crossing
//! is exactly "the stored sample and the new sample fall on different sides
//! of the boundary". Distance to the boundary is great-circle distance.

use std::sync::Arc;

use dammaiguda_auth::Identity;
use dammaiguda_core::{EventBus, FenceId, FenceTransition, GeoPoint, HubEvent, UserId};
use dammaiguda_store::{Geofence, LiveLocation, Store};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{GeoError, Result};

/// Mean Earth radius in meters.
const EARTH_RADIUS_M: f64 = 6_371_000.0;
/// Largest accepted fence radius in meters.
const MAX_RADIUS_M: f64 = 100_000.0;
/// Maximum fence name length, in characters.
const MAX_FENCE_NAME_CHARS: usize = 80;

/// Great-circle distance between two points in meters, by the haversine
/// formula.
#[must_use]
pub fn haversine_m(a: GeoPoint, b: GeoPoint) -> f64 {
    let phi_a = a.latitude.to_radians();
    let phi_b = b.latitude.to_radians();
    let d_phi = (b.latitude - a.latitude).to_radians();
    let d_lambda = (b.longitude - a.longitude).to_radians();

    let h = (d_phi / 2.0).sin().powi(2)
        + phi_a.cos() * phi_b.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().atan2((1.0 - h).sqrt())
}

/// A location report from a member's device.
#[derive(Debug, Clone, Deserialize)]
pub struct LocationSample {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Reported GPS accuracy in meters.
    pub accuracy_m: f64,
    /// Device battery level 0..=100, if reported.
    #[serde(default)]
    pub battery_level: Option<f64>,
}

/// Request body for creating a fence.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateFence {
    /// The member the fence watches.
    pub member_id: UserId,
    /// Fence display name.
    pub name: String,
    /// Center latitude in degrees.
    pub latitude: f64,
    /// Center longitude in degrees.
    pub longitude: f64,
    /// Fence radius in meters.
    pub radius_m: f64,
}

/// A boundary crossing detected by one location update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FenceCrossing {
    /// The fence crossed.
    pub fence_id: FenceId,
    /// Fence display name.
    pub fence_name: String,
    /// Enter or exit.
    pub transition: FenceTransition,
}

/// Fence CRUD and location evaluation over a [`Store`].
pub struct GeofenceEvaluator<S> {
    store: Arc<S>,
    bus: EventBus,
}

impl<S: Store> GeofenceEvaluator<S> {
    /// Create a new evaluator.
    #[must_use]
    pub fn new(store: Arc<S>, bus: EventBus) -> Self {
        Self { store, bus }
    }

    /// Store a member's location sample and evaluate every fence around
    /// them.
    ///
    /// Returns the crossings this sample produced; each one also publishes a
    /// `geofence.transition` event addressed to the fence's owner. The first
    /// sample ever seen for a member records state but produces no
    /// crossing.
    ///
    /// # Errors
    ///
    /// Returns `GeoError::ReadOnly` for guests and
    /// `GeoError::InvalidArgument` for out-of-range coordinates, accuracy,
    /// or battery level.
    pub async fn update_location(
        &self,
        member: &Identity,
        sample: LocationSample,
    ) -> Result<Vec<FenceCrossing>> {
        if member.is_read_only() {
            return Err(GeoError::ReadOnly);
        }
        validate_point(sample.latitude, sample.longitude)?;
        if !sample.accuracy_m.is_finite() || sample.accuracy_m < 0.0 {
            return Err(GeoError::InvalidArgument(
                "accuracy_m must be non-negative".to_owned(),
            ));
        }
        if let Some(battery) = sample.battery_level {
            if !(0.0..=100.0).contains(&battery) {
                return Err(GeoError::InvalidArgument(
                    "battery_level must be between 0 and 100".to_owned(),
                ));
            }
        }

        let previous = self.store.live_location(&member.user_id).await?;
        let location = LiveLocation {
            user_id: member.user_id.clone(),
            latitude: sample.latitude,
            longitude: sample.longitude,
            accuracy_m: sample.accuracy_m,
            battery_level: sample.battery_level,
            captured_at: bson::DateTime::now(),
        };
        self.store.put_live_location(&location).await?;

        let Some(previous) = previous else {
            return Ok(Vec::new());
        };

        let fences = self.store.list_geofences_for_member(&member.user_id).await?;
        let here = location.point();
        let there = previous.point();
        let mut crossings = Vec::new();
        for fence in fences {
            let was_inside = haversine_m(there, fence.center) <= fence.radius_m;
            let is_inside = haversine_m(here, fence.center) <= fence.radius_m;
            let transition = match (was_inside, is_inside) {
                (false, true) => FenceTransition::Enter,
                (true, false) => FenceTransition::Exit,
                _ => continue,
            };
            info!(
                fence_id = %fence.fence_id,
                member_id = %member.user_id,
                transition = transition.as_str(),
                "fence boundary crossed"
            );
            self.bus.publish(HubEvent::GeofenceTransition {
                event_id: uuid::Uuid::new_v4(),
                fence_id: fence.fence_id,
                fence_name: fence.name.clone(),
                watcher_id: fence.owner_watcher_id.clone(),
                member_id: member.user_id.clone(),
                member_name: member.name.clone(),
                transition,
                location: here,
            });
            crossings.push(FenceCrossing {
                fence_id: fence.fence_id,
                fence_name: fence.name,
                transition,
            });
        }
        Ok(crossings)
    }

    /// Create a fence around a member the watcher holds an accepted family
    /// link with.
    ///
    /// # Errors
    ///
    /// Returns `GeoError::NotLinked` without an accepted link, and
    /// `GeoError::InvalidArgument` for a bad name, coordinates, or radius.
    pub async fn create_fence(&self, watcher: &Identity, req: CreateFence) -> Result<Geofence> {
        if watcher.is_read_only() {
            return Err(GeoError::ReadOnly);
        }
        let name = req.name.trim();
        if name.is_empty() {
            return Err(GeoError::InvalidArgument("fence name is empty".to_owned()));
        }
        if name.chars().count() > MAX_FENCE_NAME_CHARS {
            return Err(GeoError::InvalidArgument(format!(
                "fence name exceeds {MAX_FENCE_NAME_CHARS} characters"
            )));
        }
        validate_point(req.latitude, req.longitude)?;
        if !req.radius_m.is_finite() || req.radius_m <= 0.0 || req.radius_m > MAX_RADIUS_M {
            return Err(GeoError::InvalidArgument(format!(
                "radius_m must be greater than 0 and at most {MAX_RADIUS_M} meters"
            )));
        }
        if self
            .store
            .family_link(&watcher.user_id, &req.member_id)
            .await?
            .is_none()
        {
            return Err(GeoError::NotLinked {
                watcher_id: watcher.user_id.clone(),
                member_id: req.member_id,
            });
        }

        let fence = Geofence {
            fence_id: FenceId::generate(),
            owner_watcher_id: watcher.user_id.clone(),
            subject_member_id: req.member_id,
            name: name.to_owned(),
            center: GeoPoint {
                latitude: req.latitude,
                longitude: req.longitude,
            },
            radius_m: req.radius_m,
            created_at: bson::DateTime::now(),
        };
        self.store.insert_geofence(&fence).await?;
        info!(
            fence_id = %fence.fence_id,
            watcher_id = %fence.owner_watcher_id,
            member_id = %fence.subject_member_id,
            radius_m = fence.radius_m,
            "geofence created"
        );
        Ok(fence)
    }

    /// List the fences the watcher placed around one member.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn list_fences(
        &self,
        watcher: &Identity,
        member_id: &UserId,
    ) -> Result<Vec<Geofence>> {
        Ok(self
            .store
            .list_geofences_owned(&watcher.user_id, member_id)
            .await?)
    }

    /// Delete a fence the watcher owns.
    ///
    /// # Errors
    ///
    /// Returns `GeoError::FenceNotFound` or `GeoError::NotOwner`.
    pub async fn delete_fence(&self, watcher: &Identity, fence_id: &FenceId) -> Result<()> {
        let fence = self
            .store
            .get_geofence(fence_id)
            .await?
            .ok_or(GeoError::FenceNotFound(*fence_id))?;
        if fence.owner_watcher_id != watcher.user_id {
            return Err(GeoError::NotOwner {
                user_id: watcher.user_id.clone(),
                fence_id: *fence_id,
            });
        }
        self.store.delete_geofence(fence_id).await?;
        info!(%fence_id, "geofence deleted");
        Ok(())
    }

    /// Read a member's latest location. Allowed for the member themselves
    /// and for watchers holding an accepted link.
    ///
    /// # Errors
    ///
    /// Returns `GeoError::NotLinked` when the caller is neither.
    pub async fn member_location(
        &self,
        caller: &Identity,
        member_id: &UserId,
    ) -> Result<Option<LiveLocation>> {
        if caller.user_id != *member_id
            && self
                .store
                .family_link(&caller.user_id, member_id)
                .await?
                .is_none()
        {
            return Err(GeoError::NotLinked {
                watcher_id: caller.user_id.clone(),
                member_id: member_id.clone(),
            });
        }
        Ok(self.store.live_location(member_id).await?)
    }
}

fn validate_point(latitude: f64, longitude: f64) -> Result<()> {
    if !(-90.0..=90.0).contains(&latitude) {
        return Err(GeoError::InvalidArgument(format!(
            "latitude {latitude} out of range"
        )));
    }
    if !(-180.0..=180.0).contains(&longitude) {
        return Err(GeoError::InvalidArgument(format!(
            "longitude {longitude} out of range"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dammaiguda_auth::Role;
    use dammaiguda_store::{FamilyLink, MemoryStore};

    const SCHOOL: GeoPoint = GeoPoint {
        latitude: 17.5,
        longitude: 78.5,
    };

    struct Harness {
        evaluator: GeofenceEvaluator<MemoryStore>,
        store: Arc<MemoryStore>,
        bus: EventBus,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let bus = EventBus::new(64);
        let evaluator = GeofenceEvaluator::new(Arc::clone(&store), bus.clone());
        Harness {
            evaluator,
            store,
            bus,
        }
    }

    fn citizen(id: &str, name: &str) -> Identity {
        Identity {
            user_id: UserId::new(id),
            name: name.to_owned(),
            role: Role::Citizen,
            area_id: Some("area-1".to_owned()),
        }
    }

    async fn link(store: &MemoryStore, watcher: &str, member: &str) {
        store
            .put_family_link(&FamilyLink {
                watcher_id: UserId::new(watcher),
                member_id: UserId::new(member),
                relationship: "parent".to_owned(),
                accepted_at: bson::DateTime::now(),
            })
            .await
            .unwrap();
    }

    /// A point `meters` due north of `point`.
    fn north_of(point: GeoPoint, meters: f64) -> GeoPoint {
        GeoPoint {
            latitude: point.latitude + (meters / EARTH_RADIUS_M).to_degrees(),
            longitude: point.longitude,
        }
    }

    fn sample(point: GeoPoint) -> LocationSample {
        LocationSample {
            latitude: point.latitude,
            longitude: point.longitude,
            accuracy_m: 10.0,
            battery_level: None,
        }
    }

    async fn school_fence(h: &Harness, watcher: &str, member: &str) -> Geofence {
        link(&h.store, watcher, member).await;
        h.evaluator
            .create_fence(
                &citizen(watcher, "Watcher"),
                CreateFence {
                    member_id: UserId::new(member),
                    name: "school".to_owned(),
                    latitude: SCHOOL.latitude,
                    longitude: SCHOOL.longitude,
                    radius_m: 500.0,
                },
            )
            .await
            .unwrap()
    }

    #[test]
    fn haversine_matches_known_distances() {
        assert!(haversine_m(SCHOOL, SCHOOL) < 1e-6);
        let one_km = haversine_m(SCHOOL, north_of(SCHOOL, 1000.0));
        assert!((999.0..1001.0).contains(&one_km), "got {one_km}");
        // Symmetry.
        let there = north_of(SCHOOL, 12_345.0);
        let d1 = haversine_m(SCHOOL, there);
        let d2 = haversine_m(there, SCHOOL);
        assert!((d1 - d2).abs() < 1e-6);
    }

    #[tokio::test]
    async fn first_sample_records_state_without_crossing() {
        let h = harness();
        school_fence(&h, "w-1", "m-1").await;
        let member = citizen("m-1", "Ravi");

        // Inside the fence, but nothing to cross from.
        let crossings = h
            .evaluator
            .update_location(&member, sample(north_of(SCHOOL, 200.0)))
            .await
            .unwrap();
        assert!(crossings.is_empty());
        assert!(h.store.live_location(&member.user_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn approaching_the_fence_enters_it() {
        let h = harness();
        let fence = school_fence(&h, "w-1", "m-1").await;
        let member = citizen("m-1", "Ravi");
        let mut sub = h.bus.subscriber("test");

        h.evaluator
            .update_location(&member, sample(north_of(SCHOOL, 1200.0)))
            .await
            .unwrap();
        let crossings = h
            .evaluator
            .update_location(&member, sample(north_of(SCHOOL, 200.0)))
            .await
            .unwrap();

        assert_eq!(crossings.len(), 1);
        assert_eq!(crossings[0].fence_id, fence.fence_id);
        assert_eq!(crossings[0].transition, FenceTransition::Enter);

        match sub.next().await {
            Some(HubEvent::GeofenceTransition {
                watcher_id,
                member_id,
                transition,
                fence_name,
                ..
            }) => {
                assert_eq!(watcher_id, UserId::new("w-1"));
                assert_eq!(member_id, UserId::new("m-1"));
                assert_eq!(transition, FenceTransition::Enter);
                assert_eq!(fence_name, "school");
            }
            other => panic!("wrong event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn leaving_the_fence_exits_it() {
        let h = harness();
        school_fence(&h, "w-1", "m-1").await;
        let member = citizen("m-1", "Ravi");

        h.evaluator
            .update_location(&member, sample(north_of(SCHOOL, 100.0)))
            .await
            .unwrap();
        let crossings = h
            .evaluator
            .update_location(&member, sample(north_of(SCHOOL, 900.0)))
            .await
            .unwrap();

        assert_eq!(crossings.len(), 1);
        assert_eq!(crossings[0].transition, FenceTransition::Exit);
    }

    #[tokio::test]
    async fn moving_within_one_side_is_quiet() {
        let h = harness();
        school_fence(&h, "w-1", "m-1").await;
        let member = citizen("m-1", "Ravi");

        h.evaluator
            .update_location(&member, sample(north_of(SCHOOL, 100.0)))
            .await
            .unwrap();
        let inside_again = h
            .evaluator
            .update_location(&member, sample(north_of(SCHOOL, 400.0)))
            .await
            .unwrap();
        assert!(inside_again.is_empty());

        h.evaluator
            .update_location(&member, sample(north_of(SCHOOL, 2000.0)))
            .await
            .unwrap();
        let outside_again = h
            .evaluator
            .update_location(&member, sample(north_of(SCHOOL, 3000.0)))
            .await
            .unwrap();
        assert!(outside_again.is_empty());
    }

    #[tokio::test]
    async fn every_watchers_fence_is_evaluated() {
        let h = harness();
        school_fence(&h, "w-1", "m-1").await;
        link(&h.store, "w-2", "m-1").await;
        h.evaluator
            .create_fence(
                &citizen("w-2", "Uncle"),
                CreateFence {
                    member_id: UserId::new("m-1"),
                    name: "school gate".to_owned(),
                    latitude: SCHOOL.latitude,
                    longitude: SCHOOL.longitude,
                    radius_m: 300.0,
                },
            )
            .await
            .unwrap();
        let member = citizen("m-1", "Ravi");

        h.evaluator
            .update_location(&member, sample(north_of(SCHOOL, 1200.0)))
            .await
            .unwrap();
        let crossings = h
            .evaluator
            .update_location(&member, sample(north_of(SCHOOL, 200.0)))
            .await
            .unwrap();

        assert_eq!(crossings.len(), 2);
        assert!(crossings.iter().all(|c| c.transition == FenceTransition::Enter));
    }

    #[tokio::test]
    async fn fence_creation_is_guarded() {
        let h = harness();
        let watcher = citizen("w-1", "Watcher");
        let request = CreateFence {
            member_id: UserId::new("m-1"),
            name: "school".to_owned(),
            latitude: SCHOOL.latitude,
            longitude: SCHOOL.longitude,
            radius_m: 500.0,
        };

        // No accepted link yet.
        let err = h.evaluator.create_fence(&watcher, request.clone()).await.unwrap_err();
        assert!(matches!(err, GeoError::NotLinked { .. }));

        link(&h.store, "w-1", "m-1").await;
        let err = h
            .evaluator
            .create_fence(
                &watcher,
                CreateFence {
                    radius_m: 0.0,
                    ..request.clone()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GeoError::InvalidArgument(_)));

        let err = h
            .evaluator
            .create_fence(
                &watcher,
                CreateFence {
                    latitude: 91.0,
                    ..request.clone()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GeoError::InvalidArgument(_)));

        h.evaluator.create_fence(&watcher, request).await.unwrap();
        let fences = h
            .evaluator
            .list_fences(&watcher, &UserId::new("m-1"))
            .await
            .unwrap();
        assert_eq!(fences.len(), 1);
    }

    #[tokio::test]
    async fn only_the_owner_deletes_a_fence() {
        let h = harness();
        let fence = school_fence(&h, "w-1", "m-1").await;
        let stranger = citizen("w-2", "Stranger");
        let owner = citizen("w-1", "Watcher");

        let err = h
            .evaluator
            .delete_fence(&stranger, &fence.fence_id)
            .await
            .unwrap_err();
        assert!(matches!(err, GeoError::NotOwner { .. }));

        h.evaluator.delete_fence(&owner, &fence.fence_id).await.unwrap();
        let fences = h
            .evaluator
            .list_fences(&owner, &UserId::new("m-1"))
            .await
            .unwrap();
        assert!(fences.is_empty());

        let err = h
            .evaluator
            .delete_fence(&owner, &fence.fence_id)
            .await
            .unwrap_err();
        assert!(matches!(err, GeoError::FenceNotFound(_)));
    }

    #[tokio::test]
    async fn member_location_needs_a_link_or_self() {
        let h = harness();
        link(&h.store, "w-1", "m-1").await;
        let member = citizen("m-1", "Ravi");
        h.evaluator
            .update_location(&member, sample(SCHOOL))
            .await
            .unwrap();

        let watcher = citizen("w-1", "Watcher");
        let seen = h
            .evaluator
            .member_location(&watcher, &member.user_id)
            .await
            .unwrap();
        assert!(seen.is_some());

        let own = h
            .evaluator
            .member_location(&member, &member.user_id)
            .await
            .unwrap();
        assert!(own.is_some());

        let stranger = citizen("u-9", "Stranger");
        let err = h
            .evaluator
            .member_location(&stranger, &member.user_id)
            .await
            .unwrap_err();
        assert!(matches!(err, GeoError::NotLinked { .. }));
    }

    #[tokio::test]
    async fn bad_samples_are_rejected() {
        let h = harness();
        let member = citizen("m-1", "Ravi");

        let err = h
            .evaluator
            .update_location(
                &member,
                LocationSample {
                    latitude: 91.0,
                    longitude: 78.5,
                    accuracy_m: 10.0,
                    battery_level: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GeoError::InvalidArgument(_)));

        let err = h
            .evaluator
            .update_location(
                &member,
                LocationSample {
                    latitude: 17.5,
                    longitude: 78.5,
                    accuracy_m: -1.0,
                    battery_level: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GeoError::InvalidArgument(_)));

        let err = h
            .evaluator
            .update_location(
                &member,
                LocationSample {
                    latitude: 17.5,
                    longitude: 78.5,
                    accuracy_m: 10.0,
                    battery_level: Some(150.0),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GeoError::InvalidArgument(_)));

        let err = h
            .evaluator
            .update_location(&Identity::guest(), sample(SCHOOL))
            .await
            .unwrap_err();
        assert!(matches!(err, GeoError::ReadOnly));
    }
}
