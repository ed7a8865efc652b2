//! Per-tenant gallery of enrolled descriptors.
//!
//! A gallery is built fresh for each polling pass from one school's
//! enrollment rows and is never mutated once built. Rows whose stored
//! descriptor fails to parse are skipped individually; a bad enrollment
//! must not take down matching for the rest of the roster.

use crate::types::Descriptor;

/// One enrolled identity inside a gallery.
#[derive(Debug, Clone)]
pub struct GalleryEntry {
    pub student_id: i64,
    pub name: String,
    pub descriptor: Descriptor,
}

/// A confident identification of a probe descriptor.
#[derive(Debug, Clone)]
pub struct Match {
    pub student_id: i64,
    pub name: String,
    pub distance: f32,
}

/// Strategy for identifying a probe descriptor against enrolled faces.
pub trait Matcher {
    fn identify(&self, probe: &Descriptor, threshold: f32) -> Option<Match>;
}

/// Labeled descriptor set for a single school, keyed by student id.
pub struct Gallery {
    entries: Vec<GalleryEntry>,
}

impl Gallery {
    /// Build a gallery from `(student_id, name, descriptor_json)` rows.
    ///
    /// Malformed descriptors (unparseable text, wrong dimensionality) are
    /// logged and skipped; the returned gallery holds only valid entries.
    pub fn build<I>(rows: I) -> Gallery
    where
        I: IntoIterator<Item = (i64, String, String)>,
    {
        let mut entries = Vec::new();
        for (student_id, name, descriptor_json) in rows {
            match Descriptor::from_json(&descriptor_json) {
                Ok(descriptor) => entries.push(GalleryEntry { student_id, name, descriptor }),
                Err(err) => {
                    tracing::warn!(student_id, error = %err, "skipping invalid enrolled descriptor");
                }
            }
        }
        Gallery { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[GalleryEntry] {
        &self.entries
    }
}

impl Matcher for Gallery {
    /// Find the nearest enrolled descriptor by Euclidean distance.
    ///
    /// A distance exactly equal to `threshold` is accepted; strictly above
    /// is not. Equal distances resolve to the earliest-enrolled entry.
    fn identify(&self, probe: &Descriptor, threshold: f32) -> Option<Match> {
        let mut best: Option<(usize, f32)> = None;

        for (i, entry) in self.entries.iter().enumerate() {
            let dist = probe.distance(&entry.descriptor);
            match best {
                Some((_, best_dist)) if dist >= best_dist => {}
                _ => best = Some((i, dist)),
            }
        }

        match best {
            Some((i, dist)) if dist <= threshold => Some(Match {
                student_id: self.entries[i].student_id,
                name: self.entries[i].name.clone(),
                distance: dist,
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DESCRIPTOR_DIM;

    fn descriptor_json(first: f32) -> String {
        let mut values = vec![0.0f32; DESCRIPTOR_DIM];
        values[0] = first;
        serde_json::to_string(&values).unwrap()
    }

    fn probe(first: f32) -> Descriptor {
        let mut values = vec![0.0f32; DESCRIPTOR_DIM];
        values[0] = first;
        Descriptor { values }
    }

    #[test]
    fn test_build_skips_malformed_rows() {
        let gallery = Gallery::build(vec![
            (1, "Ana".into(), descriptor_json(0.1)),
            (2, "Bruno".into(), "not json".into()),
            (3, "Carla".into(), "[1.0, 2.0]".into()),
            (4, "Davi".into(), descriptor_json(0.9)),
        ]);
        assert_eq!(gallery.len(), 2);
        assert_eq!(gallery.entries()[0].student_id, 1);
        assert_eq!(gallery.entries()[1].student_id, 4);
    }

    #[test]
    fn test_identify_nearest_entry() {
        let gallery = Gallery::build(vec![
            (1, "Ana".into(), descriptor_json(0.0)),
            (2, "Bruno".into(), descriptor_json(1.0)),
        ]);
        let m = gallery.identify(&probe(0.9), 0.6).unwrap();
        assert_eq!(m.student_id, 2);
        assert!((m.distance - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_identify_threshold_inclusive() {
        let gallery = Gallery::build(vec![(1, "Ana".into(), descriptor_json(0.0))]);
        // Distance is exactly 0.6: still a match.
        let m = gallery.identify(&probe(0.6), 0.6);
        assert!(m.is_some());
        assert_eq!(m.unwrap().student_id, 1);
    }

    #[test]
    fn test_identify_above_threshold_rejected() {
        let gallery = Gallery::build(vec![(1, "Ana".into(), descriptor_json(0.0))]);
        assert!(gallery.identify(&probe(0.601), 0.6).is_none());
    }

    #[test]
    fn test_identify_tie_prefers_earliest_enrolled() {
        // Two entries at identical distance from the probe.
        let gallery = Gallery::build(vec![
            (7, "Ana".into(), descriptor_json(0.2)),
            (8, "Bruno".into(), descriptor_json(0.2)),
        ]);
        let m = gallery.identify(&probe(0.3), 0.6).unwrap();
        assert_eq!(m.student_id, 7);
    }

    #[test]
    fn test_identify_empty_gallery() {
        let gallery = Gallery::build(Vec::new());
        assert!(gallery.is_empty());
        assert!(gallery.identify(&probe(0.0), 0.6).is_none());
    }
}
