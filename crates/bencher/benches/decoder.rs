use std::hint::black_box;

use bencher::{TestCase, TestFile};
use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use micro_connector::codec::LineDecoder;
use micro_connector::codec::start_line::parse_request_line;
use micro_connector::protocol::RequestHeader;
use micro_connector::protocol::header::parse_header_line;
use tokio_util::bytes::BytesMut;
use tokio_util::codec::Decoder;

static SMALL_HEADER: TestFile = TestFile::new("get_small.txt", include_str!("../resources/request/get_small.txt"));
static LARGE_HEADER: TestFile = TestFile::new("get_large.txt", include_str!("../resources/request/get_large.txt"));

fn create_test_cases() -> Vec<TestCase> {
    vec![
        TestCase::whole("small_header", SMALL_HEADER),
        TestCase::whole("large_header", LARGE_HEADER),
        TestCase::split("small_header_split_16", SMALL_HEADER, 16),
        TestCase::split("large_header_split_16", LARGE_HEADER, 16),
        TestCase::split("large_header_split_1", LARGE_HEADER, 1),
    ]
}

/// Decodes a request head the way the inbound way does, one read at a time.
fn decode_head(decoder: &mut LineDecoder, reads: &[&[u8]]) -> RequestHeader {
    let mut header: Option<RequestHeader> = None;
    let mut src = BytesMut::new();

    for read in reads {
        src.extend_from_slice(read);
        while let Some(line) = decoder.decode(&mut src).expect("input should be a valid request head") {
            if header.is_none() {
                header = Some(parse_request_line(&line).expect("input should start with a request line"));
                continue;
            }
            if line.is_empty() {
                return header.take().expect("request line already decoded");
            }
            let (name, value) = parse_header_line(&line).expect("input should only contain valid headers");
            if let Some(header) = header.as_mut() {
                header.as_mut().headers_mut().append(name, value);
            }
        }
    }

    panic!("input should end with an empty line")
}

fn benchmark_head_decoder(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("head_decoder");

    for case in create_test_cases() {
        group.throughput(Throughput::Bytes(case.file().content().len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(case.name()), &case, |b, case| {
            let mut decoder = LineDecoder::default();
            b.iter_batched(
                || case.reads(),
                |reads| black_box(decode_head(&mut decoder, &reads)),
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

criterion_group!(decoder, benchmark_head_decoder);
criterion_main!(decoder);
