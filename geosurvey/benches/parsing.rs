//! Benchmarks pour le pipeline détection → validation → parsing

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use geosurvey::{process, process_batch, SizeLimits, SurveyInput};

fn load_fixtures() -> Vec<(String, Vec<u8>)> {
    let pattern = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/*");
    let Ok(paths) = glob::glob(pattern) else {
        return vec![];
    };

    paths
        .filter_map(Result::ok)
        .filter_map(|path| {
            let name = path.file_name()?.to_string_lossy().to_string();
            let bytes = std::fs::read(&path).ok()?;
            Some((name, bytes))
        })
        .collect()
}

/// Fichier KML synthétique de `n` placemarks polygonaux
fn synthetic_kml(n: usize) -> Vec<u8> {
    let mut kml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8"?><kml xmlns="http://www.opengis.net/kml/2.2"><Document>"#,
    );
    for i in 0..n {
        let lon = 85.0 + (i % 100) as f64 * 0.001;
        let lat = 27.0 + (i / 100) as f64 * 0.001;
        kml.push_str(&format!(
            "<Placemark><name>Plot {i}</name><ExtendedData><Data name=\"kitta_no\"><value>{i}</value></Data></ExtendedData>\
             <Polygon><outerBoundaryIs><LinearRing><coordinates>{lon},{lat} {lon2},{lat} {lon2},{lat2} {lon},{lat2} {lon},{lat}</coordinates></LinearRing></outerBoundaryIs></Polygon></Placemark>",
            i = i,
            lon = lon,
            lat = lat,
            lon2 = lon + 0.0005,
            lat2 = lat + 0.0005,
        ));
    }
    kml.push_str("</Document></kml>");
    kml.into_bytes()
}

fn bench_parse_single(c: &mut Criterion) {
    let limits = SizeLimits::default();
    let mut group = c.benchmark_group("parse_single");

    for (name, bytes) in load_fixtures() {
        group.throughput(Throughput::Bytes(bytes.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(&name), &bytes, |b, bytes| {
            b.iter(|| {
                let processed = process(black_box(bytes), &name, bytes.len() as u64, &limits).unwrap();
                black_box(processed)
            })
        });
    }

    let large = synthetic_kml(5_000);
    group.throughput(Throughput::Bytes(large.len() as u64));
    group.sample_size(10);
    group.bench_function("synthetic_5000_placemarks", |b| {
        b.iter(|| {
            let processed = process(black_box(&large), "synthetic.kml", large.len() as u64, &limits).unwrap();
            black_box(processed.result.records.len())
        })
    });

    group.finish();
}

fn bench_parse_batch(c: &mut Criterion) {
    let files: Vec<(String, Vec<u8>)> = (0..16)
        .map(|i| (format!("batch-{}.kml", i), synthetic_kml(500)))
        .collect();
    let total_size: u64 = files.iter().map(|(_, b)| b.len() as u64).sum();
    let inputs: Vec<SurveyInput> = files
        .iter()
        .map(|(name, bytes)| SurveyInput::new(name, bytes))
        .collect();
    let limits = SizeLimits::default();

    let mut group = c.benchmark_group("parse_batch");
    group.throughput(Throughput::Bytes(total_size));
    group.sample_size(10);

    group.bench_function("sequential", |b| {
        b.iter(|| {
            let mut total_records = 0;
            for input in &inputs {
                if let Ok(processed) = process(input.bytes, input.filename, input.declared_size, &limits) {
                    total_records += processed.result.records.len();
                }
            }
            black_box(total_records)
        })
    });

    group.bench_function("rayon", |b| {
        b.iter(|| {
            let total_records: usize = process_batch(black_box(&inputs), &limits)
                .into_iter()
                .filter_map(Result::ok)
                .map(|p| p.result.records.len())
                .sum();
            black_box(total_records)
        })
    });

    group.finish();
}

criterion_group!(benches, bench_parse_single, bench_parse_batch);
criterion_main!(benches);
