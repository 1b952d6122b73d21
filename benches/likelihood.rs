use criterion::{black_box, criterion_group, criterion_main, Criterion};
use gwnest::{
    GaussianLikelihood, Interferometer, LogLikelihood, SineGaussian, SourceModel,
    WhitenedLikelihood,
};
use rand::SeedableRng;

fn make_detectors(source: &SineGaussian) -> Vec<Interferometer> {
    let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(42);
    let n = source.frequency_array().len();
    ["H1", "L1", "V1"]
        .into_iter()
        .map(|name| {
            let mut ifo = Interferometer::from_name(
                name,
                source.sampling_frequency(),
                source.time_duration(),
                vec![1e-46; n],
            )
            .unwrap();
            ifo.set_strain_data_from_power_spectral_density(&mut rng);
            ifo.inject_signal(
                &source.frequency_domain_strain(),
                source.extrinsic(),
                source.frequency_array(),
            )
            .unwrap();
            ifo
        })
        .collect()
}

fn make_source(sampling_frequency: f64, duration: f64) -> SineGaussian {
    let mut source = SineGaussian::new(sampling_frequency, duration);
    source.extrinsic.ra = 1.3;
    source.extrinsic.dec = -0.4;
    source.extrinsic.geocent_time = 1_126_259_642.4;
    source
}

fn criterion_benchmark(c: &mut Criterion) {
    for (fs, duration) in [(1024., 4.), (4096., 8.)] {
        let source = make_source(fs, duration);
        let detectors = make_detectors(&source);

        let mut likelihood = GaussianLikelihood::new(detectors.clone(), source.clone());
        c.bench_function(&format!("gaussian likelihood {fs} Hz {duration} s"), |b| {
            b.iter(|| {
                likelihood.set_parameter("frequency", black_box(101.)).unwrap();
                likelihood.log_likelihood().unwrap()
            })
        });

        let mut likelihood = WhitenedLikelihood::new(detectors, source);
        c.bench_function(&format!("whitened likelihood {fs} Hz {duration} s"), |b| {
            b.iter(|| {
                likelihood.set_parameter("frequency", black_box(101.)).unwrap();
                likelihood.log_likelihood().unwrap()
            })
        });
    }
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
