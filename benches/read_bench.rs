use criterion::{black_box, criterion_group, criterion_main, Criterion};
use opak::archive::Archive;
use opak::cipher::{Aes128Ecb, Cipher, CipherContext, StreamXor, StrategyId};
use opak::writer::{pack, ContainerBuilder};
use tempfile::TempDir;

fn bench_ciphers(c: &mut Criterion) {
    let data = vec![0x5Au8; 1024 * 1024];
    let xor = StreamXor { key: 193 };
    let ecb = Aes128Ecb::from_passphrase("testtesttesttest");

    c.bench_function("xor_encrypt_1mb", |b| b.iter(|| xor.encrypt(black_box(&data))));
    c.bench_function("ecb_encrypt_1mb", |b| b.iter(|| ecb.encrypt(black_box(&data))));

    let ct = ecb.encrypt(&data).unwrap();
    c.bench_function("ecb_decrypt_1mb", |b| {
        b.iter(|| ecb.decrypt(black_box(&ct), data.len() as u64))
    });
}

fn bench_read(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let plain = dir.path().join("plain.opak");
    let sealed = dir.path().join("sealed.opak");

    let mut builder = ContainerBuilder::new();
    builder.add_file("blob.bin", &vec![7u8; 1024 * 1024]).unwrap();
    builder.write_file(&plain).unwrap();
    pack(&plain, &sealed, StrategyId::StreamXor, &CipherContext::default()).unwrap();

    let ar = Archive::open(&sealed).unwrap();
    let info = ar.get_file_info("blob.bin").unwrap();

    c.bench_function("read_sync_1mb", |b| {
        b.iter(|| ar.read_sync(black_box(info.offset), black_box(info.size)))
    });
    c.bench_function("read_file_xor_1mb", |b| b.iter(|| ar.read_file(black_box("blob.bin"))));
}

criterion_group!(benches, bench_ciphers, bench_read);
criterion_main!(benches);
