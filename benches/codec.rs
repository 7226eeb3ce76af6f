use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use stationmeta_rs::{
    Channel, Decimation, Document, Fir, Format, NanoTime, Network, PoleZero, PolesZeros,
    PzTransferFunction, Response, Stage, StageKind, Station, Symmetry, Unit, load, save,
};

/// Build a network of `stations` stations with three channels each, every
/// channel carrying a sensor, a digitizer and a long FIR stage.
fn make_document(stations: usize) -> Document {
    let start = NanoTime::from_day(2020, 1);
    let mut doc = Document::new();
    doc.info.source = "bench".into();
    let velocity = doc.units.intern(Unit::new("M/S").with_description("Velocity"));
    let volts = doc.units.intern(Unit::new("V").with_description("Volts"));
    let counts = doc.units.intern(Unit::new("COUNTS").with_description("Digital Counts"));

    // Smooth low-pass shape, good enough for timing.
    let taps: Vec<f64> = (0..251)
        .map(|i| {
            let x = (i as f64 - 125.0) / 25.0;
            (-x * x).exp() / 44.3
        })
        .collect();

    let net = doc.add_network(Network::new("XX").with_description("Bench network"));
    for s in 0..stations {
        let station = Station::new(&format!("S{s:03}"), start)
            .with_coordinates(10.0 + s as f64 * 0.01, 20.0, 100.0)
            .with_site_name("Bench site");
        let sta = doc.add_station(net, station).unwrap();
        for (code, azimuth, dip) in [("BHZ", 0.0, -90.0), ("BHN", 0.0, 0.0), ("BHE", 90.0, 0.0)] {
            let sensor = Stage::new(StageKind::PolesZeros(PolesZeros {
                transfer_function: PzTransferFunction::LaplaceRadians,
                normalization_factor: 1.0,
                normalization_frequency: 1.0,
                zeros: vec![PoleZero::new(0.0, 0.0), PoleZero::new(0.0, 0.0)],
                poles: vec![PoleZero::new(-0.037, 0.037), PoleZero::new(-0.037, -0.037)],
            }))
            .with_units(velocity, volts)
            .with_gain(1500.0, 1.0);
            let digitizer = Stage::new(StageKind::GainOnly)
                .with_units(volts, counts)
                .with_gain(419430.0, 1.0);
            let fir = Stage::new(StageKind::Fir(Fir {
                symmetry: Symmetry::None,
                coefficients: taps.clone(),
            }))
            .with_units(counts, counts)
            .with_gain(1.0, 1.0)
            .with_decimation(Decimation {
                input_sample_rate: 40.0,
                factor: 2,
                offset: 0,
                delay: 3.125,
                correction: 3.125,
            })
            .with_name("FIR_LP");
            let response = Response::new()
                .with_stage(sensor)
                .with_stage(digitizer)
                .with_stage(fir)
                .with_sensitivity(1500.0 * 419430.0, 1.0);
            let channel = Channel::new(code, "00", start)
                .with_coordinates(10.0, 20.0, 100.0, 0.0)
                .with_orientation(azimuth, dip)
                .with_sample_rate(20.0)
                .with_response(response);
            doc.add_channel(sta, channel).unwrap();
        }
    }
    doc
}

fn bench_load(c: &mut Criterion) {
    let doc = make_document(50);
    let seed = save(&doc, Format::Seed).unwrap();
    let xml = save(&doc, Format::StationXml).unwrap();

    let mut group = c.benchmark_group("load");
    group.throughput(Throughput::Elements(150));

    group.bench_function("seed/150ch", |b| {
        b.iter(|| load(black_box(&seed), Some(Format::Seed)).unwrap())
    });
    group.bench_function("stationxml/150ch", |b| {
        b.iter(|| load(black_box(&xml), Some(Format::StationXml)).unwrap())
    });

    group.finish();
}

fn bench_save(c: &mut Criterion) {
    let doc = make_document(50);

    let mut group = c.benchmark_group("save");
    group.throughput(Throughput::Elements(150));

    group.bench_function("seed/150ch", |b| {
        b.iter(|| save(black_box(&doc), Format::Seed).unwrap())
    });
    group.bench_function("stationxml/150ch", |b| {
        b.iter(|| save(black_box(&doc), Format::StationXml).unwrap())
    });

    group.finish();
}

fn bench_convert(c: &mut Criterion) {
    let _ = env_logger::builder().is_test(true).try_init();
    let seed = save(&make_document(50), Format::Seed).unwrap();

    c.bench_function("convert/seed_to_stationxml/150ch", |b| {
        b.iter(|| {
            let (doc, _) = load(black_box(&seed), None).unwrap();
            save(&doc, Format::StationXml).unwrap()
        })
    });
}

criterion_group!(benches, bench_load, bench_save, bench_convert);
criterion_main!(benches);
