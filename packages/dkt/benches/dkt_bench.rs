use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use supaquiz_dkt::{build_examples, train, DktConfig, DktGradients, DktModel, Interaction, TrainingConfig};

fn synthetic_sequences(users: usize, len: usize, num_skills: usize) -> Vec<Vec<Interaction>> {
    (0..users)
        .map(|u| {
            (0..len)
                .map(|t| {
                    let skill = (u * 7 + t * 3) % num_skills;
                    Interaction::new(skill, (u + t) % 3 != 0)
                })
                .collect()
        })
        .collect()
}

fn bench_predict(c: &mut Criterion) {
    let mut group = c.benchmark_group("predict");
    for hidden in [32usize, 128] {
        let model = DktModel::new(
            DktConfig {
                num_skills: 18,
                hidden_size: hidden,
                dropout: 0.1,
            },
            42,
        );
        let seq = &synthetic_sequences(1, 60, 18)[0];
        group.bench_with_input(BenchmarkId::from_parameter(hidden), &hidden, |b, _| {
            b.iter(|| black_box(model.predict_next(black_box(seq))))
        });
    }
    group.finish();
}

fn bench_forward_backward(c: &mut Criterion) {
    let config = DktConfig {
        num_skills: 18,
        hidden_size: 64,
        dropout: 0.0,
    };
    let model = DktModel::new(config, 42);
    let examples = build_examples(&synthetic_sequences(1, 100, 18), 18, 200);
    let example = &examples[0];

    c.bench_function("forward_backward_t99_h64", |b| {
        b.iter(|| {
            let mut grads = DktGradients::zeros_like(&model);
            let loss = model.forward_backward::<rand_chacha::ChaCha8Rng>(
                black_box(example),
                None,
                1.0,
                &mut grads,
            );
            black_box((loss, grads))
        })
    });
}

fn bench_train_epoch(c: &mut Criterion) {
    let sequences = synthetic_sequences(32, 50, 18);
    let model_config = DktConfig {
        num_skills: 18,
        hidden_size: 32,
        dropout: 0.1,
    };
    let training = TrainingConfig {
        epochs: 1,
        batch_size: 16,
        ..TrainingConfig::default()
    };

    let mut group = c.benchmark_group("train");
    group.sample_size(10);
    group.bench_function("one_epoch_32_users", |b| {
        b.iter(|| black_box(train(&sequences, model_config, &training)))
    });
    group.finish();
}

criterion_group!(benches, bench_predict, bench_forward_backward, bench_train_epoch);
criterion_main!(benches);
