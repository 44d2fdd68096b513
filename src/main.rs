extern crate hpackparse;

use hpackparse::{Decoder, Encoder, HeaderStore};

fn main() {
    let mut decoder = Decoder::new();
    let mut store = HeaderStore::new();
    let raw = b"\x82\x87\x86\x44\x0f\x77\x77\x77\x2e\x65\x78\x61\x6d\x70\x6c\x65\x2e\x63\x6f\x6d";
    let _consumed = decoder.decode(raw, &mut store).unwrap();
    println!("decoded headers:\n{}", store);
    println!("{}", decoder.table().repr());

    let mut encoder = Encoder::new();
    let headers = vec![
        (b":method".to_vec(), b"GET".to_vec()),
        (b":path".to_vec(), b"/index.html".to_vec()),
    ];
    let encoded = encoder.encode(headers.iter()).unwrap();
    println!("encoded block = {:?}", encoded);
}
