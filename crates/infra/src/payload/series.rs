//! Variable series export: one tab-separated file per variable, zipped.
//!
//! Series file layout:
//!
//! ```text
//! FORMAT_VERSION<TAB>1
//! CREATION_DATE<TAB>2024-03-02T01:00:00Z
//! ID_SITE<TAB><site_code>
//! FEEDBACK_TO<TAB><contact>
//! VARNAME<TAB><var_name>
//!
//! 2024-03-01T10:00:00Z<TAB>12.5
//! ...
//! ```

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use super::source::{EventSource, TimedEvent};
use super::{BuildError, FORMAT_VERSION, Payload, PayloadBuilder, TIMESTAMP_FORMAT, TempArtifact};
use crate::portal::UploadBody;

/// Parameters of an events export job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventsJobParams {
    /// Day whose events are exported.
    pub extract_date: NaiveDate,
}

impl EventsJobParams {
    /// The day `offset` days before `now`. The sign of `offset` is ignored,
    /// an export never looks into the future.
    ///
    /// `None` if the result is outside the supported calendar.
    pub fn for_day_offset(now: DateTime<Utc>, offset: i64) -> Option<Self> {
        let extract_date = now
            .date_naive()
            .checked_sub_days(Days::new(offset.unsigned_abs()))?;
        Some(Self { extract_date })
    }
}

/// Builds the zipped series archive of one day of events.
pub struct SeriesPayloadBuilder<S> {
    source: S,
    site_code: String,
    contact: String,
    var_type: String,
    unit: Option<String>,
    retain_artifacts: bool,
}

impl<S: EventSource> SeriesPayloadBuilder<S> {
    pub fn new(source: S, site_code: impl Into<String>, var_type: impl Into<String>) -> Self {
        Self {
            source,
            site_code: site_code.into(),
            contact: String::new(),
            var_type: var_type.into(),
            unit: None,
            retain_artifacts: false,
        }
    }

    pub fn with_contact(mut self, contact: impl Into<String>) -> Self {
        self.contact = contact.into();
        self
    }

    /// Only export events expressed in `unit`. An empty unit disables the
    /// filter.
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        let unit = unit.into();
        self.unit = (!unit.is_empty()).then_some(unit);
        self
    }

    /// Keep the generated archive after the job ends (debug).
    pub fn retain_artifacts(mut self, retain: bool) -> Self {
        self.retain_artifacts = retain;
        self
    }

    fn keeps(&self, event: &TimedEvent) -> bool {
        event.var_type == self.var_type
            && self
                .unit
                .as_deref()
                .is_none_or(|unit| event.unit.as_deref() == Some(unit))
    }

    fn write_series(
        &self,
        path: &Path,
        var_name: &str,
        created: DateTime<Utc>,
        events: &[&TimedEvent],
    ) -> Result<(), BuildError> {
        let document = series_document(&self.site_code, &self.contact, var_name, created, events);
        std::fs::write(path, document).map_err(|e| BuildError::io(path, e))
    }

    fn write_archive(&self, path: &Path, series: &[TempArtifact]) -> Result<(), BuildError> {
        let archive_err = |reason: String| BuildError::Archive {
            path: path.to_path_buf(),
            reason,
        };

        let file = File::create(path).map_err(|e| BuildError::io(path, e))?;
        let mut zip = ZipWriter::new(file);
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

        for artifact in series {
            let name = artifact
                .path()
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            zip.start_file(name.as_str(), options)
                .map_err(|e| archive_err(e.to_string()))?;
            let mut input =
                File::open(artifact.path()).map_err(|e| BuildError::io(artifact.path(), e))?;
            io::copy(&mut input, &mut zip).map_err(|e| archive_err(e.to_string()))?;
        }

        zip.finish().map_err(|e| archive_err(e.to_string()))?;
        Ok(())
    }
}

impl<S: EventSource> PayloadBuilder for SeriesPayloadBuilder<S> {
    type Params = EventsJobParams;

    fn build(
        &self,
        params: &EventsJobParams,
        staging_dir: &Path,
    ) -> Result<Option<Payload>, BuildError> {
        let mut events = self.source.events_for_day(params.extract_date)?;
        events.retain(|e| self.keeps(e));
        if events.is_empty() {
            tracing::info!(date = %params.extract_date, "no events to export");
            return Ok(None);
        }
        events.sort_by_key(|e| e.timestamp);

        let mut by_variable: BTreeMap<&str, Vec<&TimedEvent>> = BTreeMap::new();
        for event in &events {
            by_variable.entry(event.var_name.as_str()).or_default().push(event);
        }

        std::fs::create_dir_all(staging_dir).map_err(|e| BuildError::io(staging_dir, e))?;
        let export_time = Utc::now();

        // Series files are intermediate: removed as soon as the archive
        // exists, or on error.
        let mut series = Vec::with_capacity(by_variable.len());
        for (var_name, points) in &by_variable {
            check_var_name(var_name)?;
            let path = staging_dir.join(series_file_name(var_name, export_time));
            series.push(TempArtifact::new(&path, false));
            self.write_series(&path, var_name, export_time, points)?;
        }

        let archive_path = archive_path(staging_dir, &self.site_code, export_time);
        let archive = TempArtifact::new(&archive_path, self.retain_artifacts);
        self.write_archive(&archive_path, &series)?;
        drop(series);

        tracing::info!(
            date = %params.extract_date,
            events = events.len(),
            variables = by_variable.len(),
            archive = %archive_path.display(),
            "series archive built"
        );

        Ok(Some(Payload {
            record_count: events.len(),
            body: UploadBody::File(archive_path),
            artifact: Some(archive),
        }))
    }
}

fn check_var_name(name: &str) -> Result<(), BuildError> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\'])
        && !name.chars().any(char::is_control);
    if valid {
        Ok(())
    } else {
        Err(BuildError::InvalidVariableName(name.to_string()))
    }
}

fn series_file_name(var_name: &str, export_time: DateTime<Utc>) -> String {
    format!("{var_name}.{}.csv", export_time.format("%y%m%d%H%M%S"))
}

fn archive_path(staging_dir: &Path, site_code: &str, export_time: DateTime<Utc>) -> PathBuf {
    staging_dir.join(format!(
        "{site_code}-{}.zip",
        export_time.format("%Y%m%d-%H%M%S%.6f")
    ))
}

/// Render the series document of one variable.
pub fn series_document(
    site_code: &str,
    contact: &str,
    var_name: &str,
    created: DateTime<Utc>,
    events: &[&TimedEvent],
) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = writeln!(out, "FORMAT_VERSION\t{FORMAT_VERSION}");
    let _ = writeln!(out, "CREATION_DATE\t{}", created.format(TIMESTAMP_FORMAT));
    let _ = writeln!(out, "ID_SITE\t{site_code}");
    let _ = writeln!(out, "FEEDBACK_TO\t{contact}");
    let _ = writeln!(out, "VARNAME\t{var_name}");
    out.push('\n');
    for event in events {
        let _ = writeln!(
            out,
            "{}\t{}",
            event.timestamp.format(TIMESTAMP_FORMAT),
            event.value.render()
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::source::{EventValue, InMemoryEventSource};
    use chrono::TimeZone;
    use std::io::Read;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    fn event(
        hour: u32,
        var_type: &str,
        var_name: &str,
        value: EventValue,
        unit: &str,
    ) -> TimedEvent {
        TimedEvent {
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap(),
            var_type: var_type.to_string(),
            var_name: var_name.to_string(),
            value,
            unit: Some(unit.to_string()),
        }
    }

    fn kwh(hour: u32, var_name: &str, value: f64) -> TimedEvent {
        let value = EventValue::Number(serde_json::Number::from_f64(value).unwrap());
        event(hour, "energy", var_name, value, "kWh")
    }

    fn builder(source: InMemoryEventSource) -> SeriesPayloadBuilder<InMemoryEventSource> {
        SeriesPayloadBuilder::new(source, "SITE01", "energy")
            .with_contact("ops@example.org")
            .with_unit("kWh")
    }

    #[test]
    fn day_offset_ignores_sign() {
        let now = Utc.with_ymd_and_hms(2024, 3, 2, 1, 0, 0).unwrap();
        assert_eq!(EventsJobParams::for_day_offset(now, 1).unwrap().extract_date, day());
        assert_eq!(EventsJobParams::for_day_offset(now, -1).unwrap().extract_date, day());
        assert!(EventsJobParams::for_day_offset(now, i64::MIN).is_none());
    }

    #[test]
    fn no_matching_events_builds_nothing() {
        let source = InMemoryEventSource::new().with_events(
            day(),
            vec![event(1, "energy", "plug", EventValue::Bool(true), "W")],
        );
        let dir = tempfile::tempdir().unwrap();

        let payload = builder(source)
            .build(&EventsJobParams { extract_date: day() }, dir.path())
            .unwrap();

        assert!(payload.is_none());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn builds_one_series_per_variable_in_an_archive() {
        let source = InMemoryEventSource::new().with_events(
            day(),
            vec![
                kwh(11, "main", 2.0),
                kwh(10, "main", 1.5),
                kwh(10, "heating", 0.25),
                event(9, "temperature", "room", EventValue::Text("21".into()), "degC"),
            ],
        );
        let dir = tempfile::tempdir().unwrap();

        let payload = builder(source)
            .build(&EventsJobParams { extract_date: day() }, dir.path())
            .unwrap()
            .unwrap();

        assert_eq!(payload.record_count, 3);
        let UploadBody::File(archive_path) = payload.body.clone() else {
            panic!("expected a file body");
        };
        let archive_name = archive_path.file_name().unwrap().to_string_lossy();
        assert!(archive_name.starts_with("SITE01-") && archive_name.ends_with(".zip"));

        // Only the archive is left in the staging directory.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);

        let mut zip = zip::ZipArchive::new(File::open(&archive_path).unwrap()).unwrap();
        assert_eq!(zip.len(), 2);
        let main_name = zip
            .file_names()
            .find(|n| n.starts_with("main."))
            .unwrap()
            .to_string();
        let mut main = String::new();
        zip.by_name(&main_name).unwrap().read_to_string(&mut main).unwrap();

        let lines: Vec<&str> = main.lines().collect();
        assert_eq!(lines[0], "FORMAT_VERSION\t1");
        assert!(lines[1].starts_with("CREATION_DATE\t"));
        assert_eq!(lines[2], "ID_SITE\tSITE01");
        assert_eq!(lines[3], "FEEDBACK_TO\tops@example.org");
        assert_eq!(lines[4], "VARNAME\tmain");
        assert_eq!(lines[5], "");
        assert_eq!(&lines[6..], ["2024-03-01T10:00:00Z\t1.5", "2024-03-01T11:00:00Z\t2.0"]);

        drop(payload);
        assert!(!archive_path.exists());
    }

    #[test]
    fn debug_mode_keeps_the_archive() {
        let source = InMemoryEventSource::new().with_events(day(), vec![kwh(10, "main", 1.0)]);
        let dir = tempfile::tempdir().unwrap();

        let payload = builder(source)
            .retain_artifacts(true)
            .build(&EventsJobParams { extract_date: day() }, dir.path())
            .unwrap()
            .unwrap();
        let UploadBody::File(archive_path) = payload.body.clone() else {
            panic!("expected a file body");
        };
        drop(payload);

        assert!(archive_path.exists());
    }

    #[test]
    fn rejects_variable_names_that_are_paths() {
        let source =
            InMemoryEventSource::new().with_events(day(), vec![kwh(10, "../escape", 1.0)]);
        let dir = tempfile::tempdir().unwrap();

        let err = builder(source)
            .build(&EventsJobParams { extract_date: day() }, dir.path())
            .unwrap_err();

        assert!(matches!(err, BuildError::InvalidVariableName(_)));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn boolean_values_are_rendered_as_digits() {
        let e = event(10, "opened", "door", EventValue::Bool(true), "");
        let doc = series_document("S", "", "door", e.timestamp, &[&e]);
        assert!(doc.ends_with("\n\n2024-03-01T10:00:00Z\t1\n"));
    }
}
