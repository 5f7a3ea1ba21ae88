use crate::{
    backup::{self, ArchiveKind},
    changelog::{ChangeLog, LogLevel},
    config::MigrationConfig,
    layout::ModPaths,
    metadata::{self, AboutUpdate},
    replace::ReplacementTable,
    tree,
};
use anyhow::{Context, Result};
use std::{
    fs,
    path::{Path, PathBuf},
};

#[derive(Debug, Clone, Default)]
pub struct MigrationReport {
    pub files_copied: usize,
    pub files_patched: usize,
    pub substitutions: usize,
    pub warnings: usize,
    pub initial_backup: Option<PathBuf>,
    pub backup_archive: PathBuf,
    pub results_archive: PathBuf,
    pub log_path: PathBuf,
}

/// Migrates the mod at `root` from `config.from_version` to `config.to_version`.
///
/// Preconditions are checked before anything touches the disk. Once they pass,
/// the change log is always written, even when a later step fails.
pub fn migrate(root: &Path, config: &MigrationConfig) -> Result<MigrationReport> {
    let table = ReplacementTable::compile(&config.replacements)?;
    let paths = ModPaths::resolve(root, config)?;
    paths.validate()?;
    tracing::debug!(
        "migrating {} -> {} with {} rule(s)",
        paths.source_dir.display(),
        paths.dest_dir.display(),
        table.rule_count()
    );

    let mut log = ChangeLog::new();
    match run_steps(&paths, config, &table, &mut log) {
        Ok(report) => Ok(report),
        Err(err) => {
            log.error(format!("Error during update: {err:#}"));
            if let Err(write_err) = log.write(&paths.log_path) {
                tracing::warn!("could not write change log after failure: {write_err:#}");
            }
            Err(err)
        }
    }
}

fn run_steps(
    paths: &ModPaths,
    config: &MigrationConfig,
    table: &ReplacementTable,
    log: &mut ChangeLog,
) -> Result<MigrationReport> {
    let mut report = MigrationReport {
        log_path: paths.log_path.clone(),
        ..MigrationReport::default()
    };

    log.info("Checking for initial backup...".to_string());
    match backup::create_initial_backup(&paths.root, &paths.initial_backup, &paths.snapshot_inputs())?
    {
        Some(path) => {
            log.info(format!(
                "Initial backup ({}) created successfully.",
                paths.display_relative(&path)
            ));
            report.initial_backup = Some(path);
        }
        None => log.info("Initial backup already exists.".to_string()),
    }

    log.info("Creating an incremental backup...".to_string());
    let backup_archive =
        backup::create_numbered_archive(&paths.root, ArchiveKind::Backup, &paths.snapshot_inputs())?;
    log.info(format!(
        "Backup created successfully: {}",
        paths.display_relative(&backup_archive)
    ));
    report.backup_archive = backup_archive;

    report.files_copied = tree::replace_dir_with_copy(&paths.source_dir, &paths.dest_dir)?;
    log.info(format!(
        "Copied {} file(s) from '{}' to '{}'.",
        report.files_copied,
        paths.display_relative(&paths.source_dir),
        paths.display_relative(&paths.dest_dir)
    ));

    for file in tree::list_files(&paths.dest_dir)? {
        if config.matches_extension(&file) {
            let applied = patch_file(paths, table, &file, log)?;
            if applied > 0 {
                report.files_patched += 1;
                report.substitutions += applied;
            }
        }
        if is_xml(&file) {
            check_xml(paths, &file, log)?;
        }
    }
    log.info(format!(
        "Patched {} file(s) with {} substitution(s).",
        report.files_patched, report.substitutions
    ));

    update_metadata(paths, &config.to_version, log)?;

    log.write(&paths.log_path)?;
    log.info("Creating results package...".to_string());
    let results_archive =
        backup::create_numbered_archive(&paths.root, ArchiveKind::Results, &paths.result_inputs())?;
    log.info(format!(
        "Results created successfully: {}",
        paths.display_relative(&results_archive)
    ));
    report.results_archive = results_archive;

    log.info("Update and packaging completed successfully.".to_string());
    report.warnings = log.count(LogLevel::Warn);
    log.write(&paths.log_path)?;
    Ok(report)
}

/// Applies the table to one copied file. Returns the number of substitutions.
fn patch_file(
    paths: &ModPaths,
    table: &ReplacementTable,
    file: &Path,
    log: &mut ChangeLog,
) -> Result<usize> {
    let shown = paths.display_relative(file);
    let bytes = fs::read(file).with_context(|| format!("read {}", file.display()))?;
    let Ok(text) = String::from_utf8(bytes) else {
        log.warn(format!("Skipping non UTF-8 file: {shown}"));
        return Ok(0);
    };

    let patched = table.apply(&text);
    if !patched.changed() {
        return Ok(0);
    }
    fs::write(file, &patched.text).with_context(|| format!("write {}", file.display()))?;
    for substitution in &patched.substitutions {
        log.info(substitution.describe(&shown));
    }
    Ok(patched.total())
}

fn check_xml(paths: &ModPaths, file: &Path, log: &mut ChangeLog) -> Result<()> {
    let bytes = fs::read(file).with_context(|| format!("read {}", file.display()))?;
    let text = String::from_utf8_lossy(&bytes);
    if let Err(problem) = metadata::check_well_formed(&text) {
        log.warn(format!(
            "Parse error in {}: {problem}",
            paths.display_relative(file)
        ));
    }
    Ok(())
}

fn update_metadata(paths: &ModPaths, version: &str, log: &mut ChangeLog) -> Result<()> {
    let shown = paths.display_relative(&paths.about_xml);
    match metadata::update_about_xml(&paths.about_xml, version)? {
        AboutUpdate::Missing => log.warn(format!("{shown} not found. Skipping update.")),
        AboutUpdate::AlreadyListed => {
            log.info(format!("{version} already listed in <supportedVersions> of {shown}."))
        }
        AboutUpdate::Added { created_list } => {
            if created_list {
                log.info(format!("<supportedVersions> tag created in {shown}."));
            }
            log.info(format!("Added {version} to <supportedVersions> in {shown}."));
        }
    }
    Ok(())
}

fn is_xml(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().eq_ignore_ascii_case("xml"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::ReplacementRule, error::MigrateError};
    use std::io::Read;
    use tempfile::TempDir;

    const XENOTYPE: &str = "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<Defs>\n  <XenotypeDef>\n    <defName>Frostborn</defName>\n    <researchPrerequisite>Xenogermination</researchPrerequisite>\n    <renderNodeProperties>\n      <layer>80</layer>\n      <drawNorthAfterHair>false</drawNorthAfterHair>\n    </renderNodeProperties>\n  </XenotypeDef>\n</Defs>\n";

    const ABOUT: &str = "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<ModMetaData>\n  <name>Frostborn</name>\n  <supportedVersions>\n    <li>1.3</li>\n    <li>1.4</li>\n  </supportedVersions>\n</ModMetaData>\n";

    fn sample_mod() -> TempDir {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("1.4/Defs")).unwrap();
        fs::create_dir_all(root.join("1.4/Textures/Heads")).unwrap();
        fs::create_dir_all(root.join("About")).unwrap();
        fs::write(root.join("1.4/Defs/Xenotype.xml"), XENOTYPE).unwrap();
        fs::write(root.join("1.4/Defs/Plain.xml"), "<Defs>\n  <ThingDef/>\n</Defs>\n").unwrap();
        fs::write(root.join("1.4/Textures/Heads/frost.png"), [137u8, 80, 78, 71]).unwrap();
        fs::write(root.join("About/About.xml"), ABOUT).unwrap();
        dir
    }

    fn relative_files(root: &Path) -> Vec<PathBuf> {
        tree::list_files(root)
            .unwrap()
            .into_iter()
            .map(|path| path.strip_prefix(root).unwrap().to_path_buf())
            .collect()
    }

    fn zip_names(path: &Path) -> Vec<String> {
        let archive = zip::ZipArchive::new(fs::File::open(path).unwrap()).unwrap();
        archive.file_names().map(|name| name.to_string()).collect()
    }

    #[test]
    fn migrates_default_layout() {
        let dir = sample_mod();
        let root = dir.path();
        let report = migrate(root, &MigrationConfig::default()).unwrap();

        assert_eq!(relative_files(&root.join("1.4")), relative_files(&root.join("1.5")));
        assert_eq!(report.files_copied, 3);
        assert_eq!(report.files_patched, 1);
        assert_eq!(report.substitutions, 5);
        assert_eq!(report.warnings, 0);

        let migrated = fs::read_to_string(root.join("1.5/Defs/Xenotype.xml")).unwrap();
        assert!(!migrated.contains("renderNodeProperties"));
        assert!(!migrated.contains("<layer>80</layer>"));
        assert!(!migrated.contains("researchPrerequisite"));
        assert_eq!(migrated.matches("<graphicData>").count(), 1);
        assert_eq!(migrated.matches("</graphicData>").count(), 1);
        assert_eq!(migrated.matches("<layer>PostHeadgear</layer>").count(), 1);
        assert_eq!(
            migrated.matches("<drawNorthAfterHair>true</drawNorthAfterHair>").count(),
            1
        );

        assert_eq!(
            fs::read_to_string(root.join("1.4/Defs/Xenotype.xml")).unwrap(),
            XENOTYPE
        );
        assert_eq!(
            fs::read(root.join("1.5/Textures/Heads/frost.png")).unwrap(),
            vec![137u8, 80, 78, 71]
        );
    }

    #[test]
    fn log_records_removed_element_once() {
        let dir = sample_mod();
        let root = dir.path();
        migrate(root, &MigrationConfig::default()).unwrap();

        let log = fs::read_to_string(root.join("1.5_update_log.txt")).unwrap();
        let removals: Vec<&str> = log
            .lines()
            .filter(|line| line.contains("researchPrerequisite"))
            .collect();
        assert_eq!(removals.len(), 1);
        assert!(removals[0].contains("1.5/Defs/Xenotype.xml"));
        assert!(removals[0].contains("<researchPrerequisite>Xenogermination</researchPrerequisite>"));
        assert!(log.contains("Replaced '<layer>80</layer>' with '<layer>PostHeadgear</layer>' in 1.5/Defs/Xenotype.xml"));
        assert!(log.contains("Results created successfully: results 00.zip"));
    }

    #[test]
    fn about_gains_new_version_and_keeps_old_ones() {
        let dir = sample_mod();
        let root = dir.path();
        migrate(root, &MigrationConfig::default()).unwrap();
        migrate(root, &MigrationConfig::default()).unwrap();

        let about = fs::read_to_string(root.join("About/About.xml")).unwrap();
        assert!(about.contains("<li>1.3</li>"));
        assert!(about.contains("<li>1.4</li>"));
        assert_eq!(about.matches("<li>1.5</li>").count(), 1);
    }

    #[test]
    fn second_run_keeps_rollback_and_adds_numbered_archives() {
        let dir = sample_mod();
        let root = dir.path();

        let first = migrate(root, &MigrationConfig::default()).unwrap();
        assert_eq!(first.initial_backup.as_deref(), Some(root.join("backup.zip").as_path()));
        let rollback = fs::read(root.join("backup.zip")).unwrap();

        let second = migrate(root, &MigrationConfig::default()).unwrap();
        assert!(second.initial_backup.is_none());
        assert_eq!(fs::read(root.join("backup.zip")).unwrap(), rollback);

        assert_eq!(first.backup_archive, root.join("backup rev 00.zip"));
        assert_eq!(first.results_archive, root.join("results 00.zip"));
        assert_eq!(second.backup_archive, root.join("backup rev 01.zip"));
        assert_eq!(second.results_archive, root.join("results 01.zip"));

        let mut names = zip_names(&root.join("backup.zip"));
        names.sort();
        assert_eq!(
            names,
            vec![
                "1.4/Defs/Plain.xml",
                "1.4/Defs/Xenotype.xml",
                "1.4/Textures/Heads/frost.png",
                "About/About.xml",
                "README.txt",
            ]
        );
    }

    #[test]
    fn rollback_archive_holds_pre_migration_about() {
        let dir = sample_mod();
        let root = dir.path();
        migrate(root, &MigrationConfig::default()).unwrap();

        let mut archive = zip::ZipArchive::new(fs::File::open(root.join("backup.zip")).unwrap()).unwrap();
        let mut about = String::new();
        archive
            .by_name("About/About.xml")
            .unwrap()
            .read_to_string(&mut about)
            .unwrap();
        assert_eq!(about, ABOUT);
    }

    #[test]
    fn results_archive_contains_outputs_and_log() {
        let dir = sample_mod();
        let root = dir.path();
        let report = migrate(root, &MigrationConfig::default()).unwrap();

        let names = zip_names(&report.results_archive);
        assert!(names.contains(&"1.5/Defs/Xenotype.xml".to_string()));
        assert!(names.contains(&"1.4/Defs/Xenotype.xml".to_string()));
        assert!(names.contains(&"About/About.xml".to_string()));
        assert!(names.contains(&"1.5_update_log.txt".to_string()));
    }

    #[test]
    fn missing_source_aborts_without_writing() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("About")).unwrap();

        let err = migrate(root, &MigrationConfig::default()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MigrateError>(),
            Some(MigrateError::MissingDirectory { .. })
        ));
        assert!(!root.join("1.5").exists());
        assert!(!root.join("1.5_update_log.txt").exists());
        assert!(!root.join("backup.zip").exists());
        assert!(!root.join("backup rev 00.zip").exists());
        assert!(!root.join("results 00.zip").exists());
    }

    #[test]
    fn target_aliasing_an_input_is_refused_before_any_write() {
        for target in ["./1.4", "1.4/", "About", "."] {
            let dir = sample_mod();
            let root = dir.path();
            let config = MigrationConfig {
                to_version: target.to_string(),
                ..MigrationConfig::default()
            };

            let err = migrate(root, &config).unwrap_err();
            assert!(
                matches!(
                    err.downcast_ref::<MigrateError>(),
                    Some(
                        MigrateError::InvalidFolderName { .. }
                            | MigrateError::OverlappingTarget { .. }
                    )
                ),
                "{target:?}: {err:#}"
            );
            assert_eq!(
                fs::read_to_string(root.join("1.4/Defs/Xenotype.xml")).unwrap(),
                XENOTYPE
            );
            assert_eq!(fs::read_to_string(root.join("About/About.xml")).unwrap(), ABOUT);
            assert!(!root.join("backup.zip").exists(), "{target:?}");
        }
    }

    #[test]
    fn failure_after_preconditions_still_writes_log() {
        let dir = sample_mod();
        let root = dir.path();
        fs::write(root.join("About/About.xml"), "<!-- no metadata yet -->\n").unwrap();

        let err = migrate(root, &MigrationConfig::default()).unwrap_err();
        assert!(format!("{err:#}").contains("document has no root element"));

        let log = fs::read_to_string(root.join("1.5_update_log.txt")).unwrap();
        let last = log.lines().last().unwrap();
        assert!(last.starts_with("[ERROR] Error during update:"), "{last}");
        assert!(log.contains("Initial backup (backup.zip) created successfully."));
        assert!(!root.join("results 00.zip").exists());
    }

    #[test]
    fn file_in_place_of_target_dir_fails_with_log() {
        let dir = sample_mod();
        let root = dir.path();
        fs::write(root.join("1.5"), "stray file").unwrap();

        assert!(migrate(root, &MigrationConfig::default()).is_err());

        let log = fs::read_to_string(root.join("1.5_update_log.txt")).unwrap();
        assert!(log
            .lines()
            .last()
            .unwrap()
            .starts_with("[ERROR] Error during update:"));
        assert!(root.join("backup rev 00.zip").is_file());
        assert_eq!(
            fs::read_to_string(root.join("1.4/Defs/Xenotype.xml")).unwrap(),
            XENOTYPE
        );
    }

    #[test]
    fn missing_metadata_dir_aborts() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("1.4")).unwrap();

        let err = migrate(root, &MigrationConfig::default()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MigrateError>(),
            Some(MigrateError::MissingDirectory { kind: "metadata", .. })
        ));
        assert!(!root.join("1.5").exists());
    }

    #[test]
    fn missing_about_file_only_warns() {
        let dir = sample_mod();
        let root = dir.path();
        fs::remove_file(root.join("About/About.xml")).unwrap();

        let report = migrate(root, &MigrationConfig::default()).unwrap();
        assert_eq!(report.warnings, 1);
        let log = fs::read_to_string(root.join("1.5_update_log.txt")).unwrap();
        assert!(log.contains("[WARN] About/About.xml not found. Skipping update."));
    }

    #[test]
    fn malformed_xml_is_copied_and_flagged() {
        let dir = sample_mod();
        let root = dir.path();
        fs::write(root.join("1.4/Defs/Broken.xml"), "<Defs><ThingDef></Defs>").unwrap();

        let report = migrate(root, &MigrationConfig::default()).unwrap();
        assert_eq!(report.warnings, 1);
        assert!(root.join("1.5/Defs/Broken.xml").is_file());
        let log = fs::read_to_string(root.join("1.5_update_log.txt")).unwrap();
        assert!(log.contains("[WARN] Parse error in 1.5/Defs/Broken.xml"));
    }

    #[test]
    fn non_utf8_definition_is_copied_verbatim() {
        let dir = sample_mod();
        let root = dir.path();
        let bytes = vec![0xffu8, 0xfe, b'<', b'l', b'a', b'y', b'e', b'r', b'>'];
        fs::write(root.join("1.4/Defs/Legacy.xml"), &bytes).unwrap();

        migrate(root, &MigrationConfig::default()).unwrap();
        assert_eq!(fs::read(root.join("1.5/Defs/Legacy.xml")).unwrap(), bytes);
        let log = fs::read_to_string(root.join("1.5_update_log.txt")).unwrap();
        assert!(log.contains("Skipping non UTF-8 file: 1.5/Defs/Legacy.xml"));
    }

    #[test]
    fn custom_rules_and_versions() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("1.5/Defs")).unwrap();
        fs::create_dir_all(root.join("About")).unwrap();
        fs::write(root.join("1.5/Defs/a.xml"), "<Defs><tag>old</tag></Defs>").unwrap();
        fs::write(root.join("1.5/Defs/notes.txt"), "old").unwrap();
        fs::write(root.join("About/About.xml"), ABOUT).unwrap();

        let config = MigrationConfig {
            from_version: "1.5".to_string(),
            to_version: "1.6".to_string(),
            replacements: vec![ReplacementRule::literal("old", "new")],
            ..MigrationConfig::default()
        };
        let report = migrate(root, &config).unwrap();

        assert_eq!(report.files_patched, 1);
        assert_eq!(
            fs::read_to_string(root.join("1.6/Defs/a.xml")).unwrap(),
            "<Defs><tag>new</tag></Defs>"
        );
        assert_eq!(fs::read_to_string(root.join("1.6/Defs/notes.txt")).unwrap(), "old");
        assert!(root.join("1.6_update_log.txt").is_file());
        assert!(fs::read_to_string(root.join("About/About.xml"))
            .unwrap()
            .contains("<li>1.6</li>"));
    }

    #[test]
    fn invalid_pattern_fails_before_any_write() {
        let dir = sample_mod();
        let root = dir.path();
        let config = MigrationConfig {
            replacements: vec![ReplacementRule::removal("[", "broken")],
            ..MigrationConfig::default()
        };

        let err = migrate(root, &config).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MigrateError>(),
            Some(MigrateError::InvalidPattern { .. })
        ));
        assert!(!root.join("1.5").exists());
        assert!(!root.join("backup.zip").exists());
    }
}
