// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Criterion benchmarks for eSCL document parsing and ScanSettings rendering
// in the scanwerk-escl crate.

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use scanwerk_core::types::{ColorMode, DocumentFormat, InputSource, ScanJobRequest};
use scanwerk_escl::capabilities::parse_capabilities;
use scanwerk_escl::settings::scan_settings_xml;
use scanwerk_escl::status::ScannerStatus;

// ---------------------------------------------------------------------------
// Helper: a capability document with `profiles` setting profiles per source
// ---------------------------------------------------------------------------

fn capabilities_document(profiles: usize) -> String {
    let profile = r#"<scan:SettingProfile>
        <scan:ColorModes>
          <scan:ColorMode>BlackAndWhite1</scan:ColorMode>
          <scan:ColorMode>Grayscale8</scan:ColorMode>
          <scan:ColorMode>RGB24</scan:ColorMode>
        </scan:ColorModes>
        <scan:DocumentFormats>
          <pwg:DocumentFormat>image/jpeg</pwg:DocumentFormat>
          <pwg:DocumentFormat>application/pdf</pwg:DocumentFormat>
          <scan:DocumentFormatExt>image/png</scan:DocumentFormatExt>
        </scan:DocumentFormats>
        <scan:SupportedResolutions>
          <scan:DiscreteResolutions>
            <scan:DiscreteResolution><scan:XResolution>150</scan:XResolution><scan:YResolution>150</scan:YResolution></scan:DiscreteResolution>
            <scan:DiscreteResolution><scan:XResolution>300</scan:XResolution><scan:YResolution>300</scan:YResolution></scan:DiscreteResolution>
            <scan:DiscreteResolution><scan:XResolution>600</scan:XResolution><scan:YResolution>600</scan:YResolution></scan:DiscreteResolution>
          </scan:DiscreteResolutions>
        </scan:SupportedResolutions>
      </scan:SettingProfile>"#;
    let profiles = profile.repeat(profiles);
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<scan:ScannerCapabilities xmlns:scan="http://schemas.hp.com/imaging/escl/2011/05/03" xmlns:pwg="http://www.pwg.org/schemas/2010/12/sm">
  <pwg:Version>2.63</pwg:Version>
  <pwg:MakeAndModel>Bench Scanner</pwg:MakeAndModel>
  <scan:Platen><scan:PlatenInputCaps>
    <scan:MaxWidth>2550</scan:MaxWidth><scan:MaxHeight>3507</scan:MaxHeight>
    <scan:SettingProfiles>{profiles}</scan:SettingProfiles>
    <scan:SupportedIntents><scan:Intent>Document</scan:Intent><scan:Intent>Photo</scan:Intent></scan:SupportedIntents>
  </scan:PlatenInputCaps></scan:Platen>
  <scan:Adf><scan:AdfSimplexInputCaps>
    <scan:SettingProfiles>{profiles}</scan:SettingProfiles>
  </scan:AdfSimplexInputCaps></scan:Adf>
</scan:ScannerCapabilities>"#
    )
}

fn bench_parse_capabilities(c: &mut Criterion) {
    let small = capabilities_document(1);
    c.bench_function("parse_capabilities (1 profile)", |b| {
        b.iter(|| parse_capabilities(black_box(small.as_bytes())).unwrap());
    });

    let large = capabilities_document(16);
    c.bench_function("parse_capabilities (16 profiles)", |b| {
        b.iter(|| parse_capabilities(black_box(large.as_bytes())).unwrap());
    });
}

fn bench_parse_status(c: &mut Criterion) {
    let doc = br#"<scan:ScannerStatus xmlns:scan="http://schemas.hp.com/imaging/escl/2011/05/03" xmlns:pwg="http://www.pwg.org/schemas/2010/12/sm">
  <pwg:State>Idle</pwg:State>
  <scan:Jobs><scan:JobInfo><pwg:JobUri>/eSCL/ScanJobs/1</pwg:JobUri><pwg:JobState>Completed</pwg:JobState></scan:JobInfo></scan:Jobs>
</scan:ScannerStatus>"#;
    c.bench_function("parse_scanner_status", |b| {
        b.iter(|| ScannerStatus::parse(black_box(doc)).unwrap());
    });
}

fn bench_scan_settings(c: &mut Criterion) {
    let caps = parse_capabilities(capabilities_document(1).as_bytes()).unwrap();
    let request = ScanJobRequest::new(DocumentFormat::Pdf)
        .intent("Document")
        .color_mode(ColorMode::Rgb24)
        .resolution(300)
        .input_source(InputSource::Flatbed);
    c.bench_function("scan_settings_xml", |b| {
        b.iter(|| scan_settings_xml(black_box(&request), black_box(&caps)));
    });
}

criterion_group!(
    benches,
    bench_parse_capabilities,
    bench_parse_status,
    bench_scan_settings
);
criterion_main!(benches);
