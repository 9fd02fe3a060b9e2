//! Shared setup for unit tests: a registrar over a throwaway database.

use std::sync::Arc;

use tempfile::TempDir;

use crate::config::{RegistrarConfig, StoreConfig};
use crate::db::{CatalogStore, DbOffering, NewOffering};
use crate::Registrar;

pub(crate) const SEMESTER: &str = "2024-2025-1";
const TEACHER: &str = "T001";

pub(crate) struct Fixture {
    pub registrar: Registrar,
    _dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = RegistrarConfig {
            database_path: dir.path().join("registrar.db"),
            store: StoreConfig {
                retry_backoff_ms: 1,
                ..StoreConfig::default()
            },
            ..RegistrarConfig::default()
        };
        let registrar = Registrar::open(&config).unwrap();
        registrar.add_teacher(TEACHER, "Grace").unwrap();
        Self {
            registrar,
            _dir: dir,
        }
    }

    pub fn store(&self) -> &CatalogStore {
        self.registrar.store()
    }

    pub fn store_arc(&self) -> Arc<CatalogStore> {
        self.registrar.store().clone()
    }

    pub fn course(&self, course_id: &str) {
        self.registrar.add_course(course_id, course_id, 3.0).unwrap();
    }

    pub fn student(&self, student_id: &str) {
        self.registrar.add_student(student_id, student_id).unwrap();
    }

    /// Adds an offering in the default semester.
    pub fn offering(&self, course_id: &str, max_students: i64, sessions: &[&str]) -> i64 {
        self.offering_in(course_id, SEMESTER, max_students, sessions)
    }

    pub fn offering_in(
        &self,
        course_id: &str,
        semester: &str,
        max_students: i64,
        sessions: &[&str],
    ) -> i64 {
        let offering_id = self
            .registrar
            .add_offering(&NewOffering {
                course_id: course_id.to_string(),
                teacher_id: TEACHER.to_string(),
                semester: semester.to_string(),
                max_students,
            })
            .unwrap();
        for session in sessions {
            self.registrar.add_session(offering_id, session).unwrap();
        }
        offering_id
    }

    pub fn offering_row(&self, offering_id: i64) -> DbOffering {
        self.registrar.get_offering(offering_id).unwrap()
    }
}
