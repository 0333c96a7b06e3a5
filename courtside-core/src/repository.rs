use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::{ClubId, CoreError, CoreResult, Court, CourtId, SurfaceType};

/// Read-only access to court configuration maintained by staff tooling.
#[async_trait]
pub trait CourtDirectory: Send + Sync {
    async fn get_court(&self, court_id: CourtId) -> CoreResult<Option<Court>>;

    async fn list_courts(
        &self,
        club_id: ClubId,
        surface_type: Option<SurfaceType>,
    ) -> CoreResult<Vec<Court>>;

    /// Resolve a court or fail with `CourtNotFound`.
    async fn require_court(&self, court_id: CourtId) -> CoreResult<Court> {
        self.get_court(court_id)
            .await?
            .ok_or(CoreError::CourtNotFound(court_id))
    }
}

/// Directory seeded from configuration at startup.
#[derive(Default)]
pub struct InMemoryCourtDirectory {
    courts: RwLock<HashMap<CourtId, Court>>,
}

impl InMemoryCourtDirectory {
    pub fn new(courts: impl IntoIterator<Item = Court>) -> Self {
        Self {
            courts: RwLock::new(courts.into_iter().map(|c| (c.id, c)).collect()),
        }
    }

    pub fn upsert(&self, court: Court) {
        self.courts.write().insert(court.id, court);
    }
}

#[async_trait]
impl CourtDirectory for InMemoryCourtDirectory {
    async fn get_court(&self, court_id: CourtId) -> CoreResult<Option<Court>> {
        Ok(self.courts.read().get(&court_id).cloned())
    }

    async fn list_courts(
        &self,
        club_id: ClubId,
        surface_type: Option<SurfaceType>,
    ) -> CoreResult<Vec<Court>> {
        let mut courts: Vec<Court> = self
            .courts
            .read()
            .values()
            .filter(|c| c.club_id == club_id && c.is_active)
            .filter(|c| surface_type.map_or(true, |s| c.surface_type == s))
            .cloned()
            .collect();
        courts.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(courts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::OperatingHours;
    use uuid::Uuid;

    fn court(club_id: ClubId, name: &str, surface_type: SurfaceType) -> Court {
        Court {
            id: Uuid::new_v4(),
            club_id,
            name: name.to_string(),
            surface_type,
            has_lighting: false,
            lighting_surcharge_cents: 0,
            is_active: true,
            operating_hours: OperatingHours::default(),
            blackouts: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_list_filters_by_club_and_surface() {
        let club = Uuid::new_v4();
        let directory = InMemoryCourtDirectory::new(vec![
            court(club, "Court 2", SurfaceType::Indoor),
            court(club, "Court 1", SurfaceType::Crystal),
            court(Uuid::new_v4(), "Elsewhere", SurfaceType::Indoor),
        ]);

        let all = directory.list_courts(club, None).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].name, "Court 1");

        let indoor = directory.list_courts(club, Some(SurfaceType::Indoor)).await.unwrap();
        assert_eq!(indoor.len(), 1);
        assert_eq!(indoor[0].name, "Court 2");
    }

    #[tokio::test]
    async fn test_require_court_reports_missing() {
        let directory = InMemoryCourtDirectory::default();
        let missing = Uuid::new_v4();
        let err = directory.require_court(missing).await.unwrap_err();
        assert_eq!(err, CoreError::CourtNotFound(missing));
    }
}
