use std::collections::HashSet;
use std::path::Path;

use crashlog_symbols::{
    BlameFilter, BinaryImage, CrashReport, Error, NullSymbolOwner, OverrideMap, PackageProvider,
    ReportFormat, SharedCacheInfo, SourceLocation, SymbolMaps, SymbolOwner, Symbolicator,
};

const APP_PATH: &str = "/var/mobile/Applications/ABC/MyApp.app/MyApp";
const EXTRA_PATH: &str = "/Library/MobileSubstrate/libextra.dylib";
const SYSTEM_PATH: &str = "/usr/lib/libsystem.dylib";

fn fixture_text() -> String {
    format!(
        "\
Process: MyApp [1234]
Path: {APP_PATH}
Identifier: com.example.myapp
Version: 1.0 (1.0)
OS Version: iPhone OS 9.0 (13A344)
Exception Type: EXC_BAD_ACCESS (SIGSEGV)

Thread 0 name: main
Thread 0 Crashed:
0   libsystem.dylib                 0x0000000180001010 0x180000000 + 4112
1   MyApp                           0x0000000100005040 0x100004000 + 4160
2   libextra.dylib                  0x0000000120001100 0x120000000 + 4352
3   MyApp                           0x0000000100005100 0x100004000 + 4352

Thread 1:
0   libsystem.dylib                 0x0000000180001200 0x180000000 + 4608
1   ???                             0x0000000150000000 0x150000000 + 0

Thread State:
  x0: 0x0000000000000000   x1: 0x00000000deadbeef   pc: 0x0000000180001010   lr: 0x0000000100005040

Binary Images:
0x100004000 - 0x100007fff MyApp arm64 <11111111111111111111111111111111> {APP_PATH}
0x120000000 - 0x120003fff libextra.dylib arm64 <22222222222222222222222222222222> {EXTRA_PATH}
0x180000000 - 0x180003fff libsystem.dylib arm64 <33333333333333333333333333333333> {SYSTEM_PATH}
"
    )
}

fn parse_fixture() -> CrashReport {
    CrashReport::parse(fixture_text().as_bytes(), ReportFormat::Auto).unwrap()
}

/// Knows the app binary (slid by 0x100000000) and the shared-cache-resident
/// system library; knows nothing about libextra.
struct FixtureOwner;

impl SymbolOwner for FixtureOwner {
    fn declared_base_address(&self, path: &Path, _image: &BinaryImage) -> Option<u64> {
        (path == Path::new(APP_PATH)).then_some(0x4000)
    }

    fn symbol_entries(&self, path: &Path, _image: &BinaryImage) -> Vec<(u64, String)> {
        if path == Path::new(APP_PATH) {
            vec![
                (0x5000, "_ZN5MyApp3runEv".to_string()),
                (0x50f0, "plainHelper".to_string()),
            ]
        } else if path == Path::new(SYSTEM_PATH) {
            vec![(0x1000, "open".to_string())]
        } else {
            Vec::new()
        }
    }

    fn source_location(
        &self,
        path: &Path,
        _image: &BinaryImage,
        address: u64,
    ) -> Option<SourceLocation> {
        (path == Path::new(APP_PATH) && address == 0x5040).then(|| SourceLocation {
            path: "Sources/main.mm".to_string(),
            line: 27,
        })
    }

    fn shared_cache(&self) -> Option<SharedCacheInfo> {
        Some(SharedCacheInfo {
            range: 0x180000000..0x190000000,
            slide: 0x180000000,
        })
    }
}

struct FixturePackages;

impl PackageProvider for FixturePackages {
    fn package_identifier(&self, path: &Path) -> Option<String> {
        if path == Path::new(APP_PATH) {
            Some("com.example.myapp".to_string())
        } else if path == Path::new(EXTRA_PATH) {
            Some("com.tweak.extra".to_string())
        } else {
            None
        }
    }

    fn install_date(&self, path: &Path) -> Option<String> {
        (path == Path::new(EXTRA_PATH)).then(|| "2025-11-03 18:00:00".to_string())
    }
}

#[test]
fn parses_the_text_fixture() {
    let report = parse_fixture();
    assert_eq!(report.process_info.get("Process").unwrap(), "MyApp [1234]");
    assert_eq!(
        report.exception.as_ref().unwrap().exception_type,
        "EXC_BAD_ACCESS (SIGSEGV)"
    );
    assert_eq!(report.threads.len(), 2);
    assert!(report.threads[0].crashed);
    assert_eq!(report.threads[0].name.as_deref(), Some("main"));
    assert_eq!(report.threads[0].backtrace.frames.len(), 4);
    assert_eq!(report.register_state.len(), 4);
    assert_eq!(report.register_state[1].0, "x1");
    assert_eq!(report.register_state[1].1, "0x00000000deadbeef");
    assert_eq!(report.binary_images.len(), 3);
    let app = &report.binary_images[&0x100004000];
    assert_eq!(app.size, 0x4000);
    assert!(app.crashed_process_image);
    assert!(!report.binary_images[&0x180000000].crashed_process_image);
    assert!(!report.is_symbolicated);
    assert!(!report.is_property_list);
}

#[test]
fn text_round_trip_is_structurally_equal() {
    let report = parse_fixture();
    let rendered = report.render(false).unwrap();
    let reparsed = CrashReport::parse(rendered.as_bytes(), ReportFormat::Text).unwrap();
    assert_eq!(reparsed, report);
}

#[test]
fn text_and_property_list_forms_are_equivalent() {
    let report = parse_fixture();
    let plist = report.render(true).unwrap();
    let from_plist = CrashReport::parse(plist.as_bytes(), ReportFormat::Auto).unwrap();
    assert!(from_plist.is_property_list);
    assert_eq!(from_plist.threads.len(), report.threads.len());
    assert_eq!(
        from_plist.exception.as_ref().unwrap().exception_type,
        report.exception.as_ref().unwrap().exception_type
    );
    assert_eq!(from_plist.binary_images, report.binary_images);
    assert_eq!(from_plist.process_info, report.process_info);
    assert_eq!(from_plist.register_state, report.register_state);
    assert_eq!(from_plist.threads, report.threads);
}

#[test]
fn non_contiguous_thread_numbers_survive_a_round_trip() {
    let text = fixture_text().replace("Thread 1:", "Thread 5:");
    let report = CrashReport::parse(text.as_bytes(), ReportFormat::Text).unwrap();
    assert_eq!(report.threads[0].number, 0);
    assert_eq!(report.threads[1].number, 5);

    let rendered = report.render(false).unwrap();
    assert!(rendered.contains("Thread 5:"));
    let reparsed = CrashReport::parse(rendered.as_bytes(), ReportFormat::Text).unwrap();
    assert_eq!(reparsed, report);

    let plist = report.render(true).unwrap();
    let from_plist = CrashReport::parse(plist.as_bytes(), ReportFormat::PropertyList).unwrap();
    assert_eq!(from_plist.threads, report.threads);
}

#[test]
fn symbolication_resolves_slid_addresses() {
    let mut report = parse_fixture();
    let owner = FixtureOwner;
    let symbolicator = Symbolicator::new(&owner);
    assert!(report.symbolicate(&symbolicator, &SymbolMaps::new()).unwrap());
    assert!(report.is_symbolicated);

    let frames = &report.threads[0].backtrace.frames;

    // App frame: loaded at 0x100004000, declared base 0x4000, so
    // 0x100005040 unslides to 0x5040 and lands in MyApp::run().
    let info = frames[1].symbol_info.as_ref().unwrap();
    assert_eq!(info.name.as_deref(), Some("MyApp::run()"));
    assert_eq!(info.offset, 0x40);
    assert_eq!(info.source_path.as_deref(), Some("Sources/main.mm"));
    assert_eq!(info.source_line, Some(27));

    // Shared-cache frame: slides by the cache slide.
    let info = frames[0].symbol_info.as_ref().unwrap();
    assert_eq!(info.name.as_deref(), Some("open"));
    assert_eq!(info.offset, 0x10);

    // Known image, no symbols: unnamed info with the in-image offset.
    let info = frames[2].symbol_info.as_ref().unwrap();
    assert_eq!(info.name, None);
    assert_eq!(info.offset, 0x1100);

    // No owning image at all: stays unresolved.
    assert!(report.threads[1].backtrace.frames[1].symbol_info.is_none());

    // A second pass is a no-op.
    assert!(!report.symbolicate(&symbolicator, &SymbolMaps::new()).unwrap());
}

#[test]
fn override_maps_take_precedence_over_symbol_tables() {
    let mut report = parse_fixture();
    let owner = FixtureOwner;
    let symbolicator = Symbolicator::new(&owner);
    let mut maps = SymbolMaps::new();
    maps.insert(
        APP_PATH.to_string(),
        OverrideMap::from([(0x5000, "customName".to_string())]),
    );
    report.symbolicate(&symbolicator, &maps).unwrap();
    let info = report.threads[0].backtrace.frames[1]
        .symbol_info
        .as_ref()
        .unwrap();
    assert_eq!(info.name.as_deref(), Some("customName"));
    assert_eq!(info.offset, 0x40);
}

#[test]
fn override_maps_match_by_uuid_too() {
    let mut report = parse_fixture();
    let owner = NullSymbolOwner;
    let symbolicator = Symbolicator::new(&owner);
    let mut maps = SymbolMaps::new();
    maps.insert(
        "11111111111111111111111111111111".to_string(),
        OverrideMap::from([(0x100005000, "byUuid".to_string())]),
    );
    report.symbolicate(&symbolicator, &maps).unwrap();
    // The null owner reports no declared base, so the slide is zero and
    // map keys are raw addresses.
    let info = report.threads[0].backtrace.frames[1]
        .symbol_info
        .as_ref()
        .unwrap();
    assert_eq!(info.name.as_deref(), Some("byUuid"));
    assert_eq!(info.offset, 0x40);
}

#[test]
fn rendered_symbolicated_report_shows_symbols_and_raw_addresses() {
    let mut report = parse_fixture();
    let owner = FixtureOwner;
    let symbolicator = Symbolicator::new(&owner);
    report.symbolicate(&symbolicator, &SymbolMaps::new()).unwrap();
    let rendered = report.render(false).unwrap();
    assert!(rendered.contains("MyApp::run() + 64 (Sources/main.mm:27)"));
    assert!(rendered.contains("open + 16"));
    // Unresolved frames keep the raw form.
    assert!(rendered.contains("0x120000000 + 4352"));
    assert!(rendered.contains("0x150000000"));
}

#[test]
fn blame_skips_system_images_and_picks_the_app() {
    let mut report = parse_fixture();
    assert!(report.blame(&BlameFilter::None, None).unwrap());
    assert!(report.is_blamed);
    let blame = report.blame_info.as_ref().unwrap();
    assert_eq!(blame.path, APP_PATH);
    assert!(report.binary_images[&0x100004000].blamable);
    assert!(!report.binary_images[&0x120000000].blamable);
    assert!(!report.binary_images[&0x180000000].blamable);
}

#[test]
fn blame_path_filter_moves_to_the_next_image() {
    let mut report = parse_fixture();
    let filter = BlameFilter::ByPath(HashSet::from([APP_PATH.to_string()]));
    assert!(report.blame(&filter, None).unwrap());
    assert_eq!(report.blame_info.as_ref().unwrap().path, EXTRA_PATH);
    assert!(report.binary_images[&0x120000000].blamable);
    assert!(!report.binary_images[&0x100004000].blamable);

    // Re-running with no filter overwrites the earlier outcome.
    assert!(report.blame(&BlameFilter::None, None).unwrap());
    assert_eq!(report.blame_info.as_ref().unwrap().path, APP_PATH);
    assert!(!report.binary_images[&0x120000000].blamable);
}

#[test]
fn blame_package_filter_consults_the_provider() {
    let mut report = parse_fixture();
    let filter = BlameFilter::ByPackage(HashSet::from(["com.example.myapp".to_string()]));
    assert!(report.blame(&filter, Some(&FixturePackages)).unwrap());
    let blame = report.blame_info.as_ref().unwrap();
    assert_eq!(blame.path, EXTRA_PATH);
    assert_eq!(blame.install_date.as_deref(), Some("2025-11-03 18:00:00"));
}

#[test]
fn blame_prefers_the_exception_backtrace() {
    // Give the exception its own unwind whose first eligible image is
    // libextra, diverging from the crashed thread.
    let exception_report_text = fixture_text().replace(
        "Thread 0 name: main",
        "Last Exception Backtrace:\n\
         0   libextra.dylib                  0x0000000120001100 0x120000000 + 4352\n\
         1   MyApp                           0x0000000100005040 0x100004000 + 4160\n\
         \n\
         Thread 0 name: main",
    );
    let mut report =
        CrashReport::parse(exception_report_text.as_bytes(), ReportFormat::Text).unwrap();
    assert!(report.blame(&BlameFilter::None, None).unwrap());
    assert_eq!(report.blame_info.as_ref().unwrap().path, EXTRA_PATH);
}

#[test]
fn blame_can_find_nothing() {
    let mut report = parse_fixture();
    let filter = BlameFilter::ByPath(HashSet::from([
        APP_PATH.to_string(),
        "/Library/MobileSubstrate/*".to_string(),
    ]));
    assert!(!report.blame(&filter, None).unwrap());
    assert!(!report.is_blamed);
    assert!(report.blame_info.is_none());
    assert!(report.binary_images.values().all(|image| !image.blamable));
    // An unblamed report still renders.
    assert!(report.render(false).unwrap().contains("Binary Images:"));
}

#[test]
fn missing_crashed_marker_is_malformed() {
    let text = fixture_text().replace("Thread 0 Crashed:", "Thread 0:");
    match CrashReport::parse(text.as_bytes(), ReportFormat::Text) {
        Err(Error::MalformedReport { section, .. }) => assert_eq!(section, "threads"),
        other => panic!("expected MalformedReport, got {other:?}"),
    }
}

#[test]
fn truncated_binary_image_line_is_malformed() {
    let text = fixture_text().replace(
        &format!("0x120000000 - 0x120003fff libextra.dylib arm64 <22222222222222222222222222222222> {EXTRA_PATH}"),
        "0x120000000 - 0x120003fff libextra.dylib",
    );
    match CrashReport::parse(text.as_bytes(), ReportFormat::Text) {
        Err(Error::MalformedReport { section, line, .. }) => {
            assert_eq!(section, "binary images");
            assert!(line > 0);
        }
        other => panic!("expected MalformedReport, got {other:?}"),
    }
}

#[test]
fn non_hex_frame_address_is_tolerated() {
    let text = fixture_text().replace(
        "0   libsystem.dylib                 0x0000000180001010 0x180000000 + 4112",
        "0   libsystem.dylib                 garbage 0x180000000 + 4112",
    );
    let mut report = CrashReport::parse(text.as_bytes(), ReportFormat::Text).unwrap();
    let frame = &report.threads[0].backtrace.frames[0];
    assert_eq!(frame.address, 0);
    let owner = NullSymbolOwner;
    let symbolicator = Symbolicator::new(&owner);
    report.symbolicate(&symbolicator, &SymbolMaps::new()).unwrap();
    assert!(report.threads[0].backtrace.frames[0].symbol_info.is_none());
}

#[test]
fn overlapping_images_are_a_data_error() {
    let text = fixture_text().replace("0x120000000 - 0x120003fff", "0x100006000 - 0x100008fff");
    let mut report = CrashReport::parse(text.as_bytes(), ReportFormat::Text).unwrap();
    let owner = NullSymbolOwner;
    let symbolicator = Symbolicator::new(&owner);
    match report.symbolicate(&symbolicator, &SymbolMaps::new()) {
        Err(Error::OverlappingImageRanges(..)) => {}
        other => panic!("expected OverlappingImageRanges, got {other:?}"),
    }
    match report.blame(&BlameFilter::None, None) {
        Err(Error::OverlappingImageRanges(..)) => {}
        other => panic!("expected OverlappingImageRanges, got {other:?}"),
    }
}

// The property-list form accepts zero-sized images; one sorted between two
// colliding images must not defeat the overlap validation.
#[test]
fn zero_sized_plist_image_does_not_hide_an_overlap() {
    let plist = r#"<?xml version="1.0" encoding="UTF-8"?>
<plist version="1.0">
<dict>
  <key>process_info</key>
  <dict>
    <key>Process</key><string>Tiny [1]</string>
    <key>Path</key><string>/app/Tiny</string>
  </dict>
  <key>threads</key>
  <array>
    <dict>
      <key>crashed</key><true/>
      <key>frames</key>
      <array>
        <dict>
          <key>depth</key><integer>0</integer>
          <key>address</key><integer>4100</integer>
          <key>image_address</key><integer>4096</integer>
        </dict>
      </array>
    </dict>
  </array>
  <key>binary_images</key>
  <dict>
    <key>4096</key>
    <dict>
      <key>path</key><string>/app/Tiny</string>
      <key>size</key><integer>20480</integer>
      <key>architecture</key><string>arm64</string>
      <key>uuid</key><string>44444444444444444444444444444444</string>
    </dict>
    <key>8192</key>
    <dict>
      <key>path</key><string>/app/Empty</string>
      <key>size</key><integer>0</integer>
      <key>architecture</key><string>arm64</string>
      <key>uuid</key><string>55555555555555555555555555555555</string>
    </dict>
    <key>12288</key>
    <dict>
      <key>path</key><string>/app/Next</string>
      <key>size</key><integer>256</integer>
      <key>architecture</key><string>arm64</string>
      <key>uuid</key><string>66666666666666666666666666666666</string>
    </dict>
  </dict>
</dict>
</plist>
"#;
    let mut report = CrashReport::parse(plist.as_bytes(), ReportFormat::Auto).unwrap();
    assert_eq!(report.binary_images[&8192].size, 0);
    let owner = NullSymbolOwner;
    let symbolicator = Symbolicator::new(&owner);
    match report.symbolicate(&symbolicator, &SymbolMaps::new()) {
        Err(Error::OverlappingImageRanges(0x1000, 0x6000, 0x3000, 0x3100)) => {}
        other => panic!("expected OverlappingImageRanges, got {other:?}"),
    }
    match report.blame(&BlameFilter::None, None) {
        Err(Error::OverlappingImageRanges(..)) => {}
        other => panic!("expected OverlappingImageRanges, got {other:?}"),
    }
}

#[test]
fn unrecognized_input_is_rejected() {
    match CrashReport::parse(&[0xff, 0xfe, 0x00], ReportFormat::Text) {
        Err(Error::UnrecognizedFormat) => {}
        other => panic!("expected UnrecognizedFormat, got {other:?}"),
    }
    match CrashReport::parse(b"not a crash log at all", ReportFormat::Auto) {
        Err(Error::MalformedReport { .. }) => {}
        other => panic!("expected MalformedReport, got {other:?}"),
    }
}

#[test]
fn write_to_file_respects_the_source_form() {
    let dir = std::env::temp_dir().join("crashlog-symbols-test");
    std::fs::create_dir_all(&dir).unwrap();
    let report = parse_fixture();
    let text_path = dir.join("out.crash");
    report.write_to_file(&text_path, false).unwrap();
    let reread = CrashReport::from_file(&text_path).unwrap();
    assert!(!reread.is_property_list);

    let plist_path = dir.join("out.plist");
    report.write_to_file(&plist_path, true).unwrap();
    let reread = CrashReport::from_file(&plist_path).unwrap();
    assert!(reread.is_property_list);
    assert_eq!(reread.threads.len(), report.threads.len());
}

#[test]
fn blamed_plist_round_trip_keeps_the_annotation() {
    let mut report = parse_fixture();
    report.blame(&BlameFilter::None, Some(&FixturePackages)).unwrap();
    let plist = report.render(true).unwrap();
    let reparsed = CrashReport::parse(plist.as_bytes(), ReportFormat::PropertyList).unwrap();
    assert!(reparsed.is_blamed);
    assert_eq!(reparsed.blame_info.as_ref().unwrap().path, APP_PATH);
}

// Resolving frames across many threads of one report is safe once each
// image's table is built exactly once; exercise concurrent first use.
#[test]
fn concurrent_resolution_shares_one_table_build() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    static BUILDS: AtomicUsize = AtomicUsize::new(0);

    struct CountingOwner;
    impl SymbolOwner for CountingOwner {
        fn declared_base_address(&self, _path: &Path, _image: &BinaryImage) -> Option<u64> {
            Some(0x4000)
        }
        fn symbol_entries(&self, _path: &Path, _image: &BinaryImage) -> Vec<(u64, String)> {
            BUILDS.fetch_add(1, Ordering::SeqCst);
            vec![(0x5000, "sym".to_string())]
        }
        fn source_location(
            &self,
            _path: &Path,
            _image: &BinaryImage,
            _address: u64,
        ) -> Option<SourceLocation> {
            None
        }
    }

    let report = parse_fixture();
    let image = &report.binary_images[&0x100004000];
    let owner = CountingOwner;
    let symbolicator = Symbolicator::new(&owner);
    std::thread::scope(|scope| {
        for _ in 0..8 {
            scope.spawn(|| {
                let info = symbolicator.resolve(0x100005040, image, None);
                assert_eq!(info.name.as_deref(), Some("sym"));
            });
        }
    });
    assert_eq!(BUILDS.load(Ordering::SeqCst), 1);
}
