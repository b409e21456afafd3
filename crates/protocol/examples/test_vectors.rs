//! Generate frame test vectors for host-side client interop testing.
//!
//! Run with: cargo run --package vshell-protocol --example test_vectors

use vshell_protocol::{Frame, FrameCodec, FrameType, WindowSize};

fn main() {
    print_test_vector("data_empty", &Frame::data(Vec::new()));
    print_test_vector("data_keystroke", &Frame::data(b"l".to_vec()));
    print_test_vector("data_line", &Frame::data(b"ls -la\r".to_vec()));
    print_test_vector("data_binary", &Frame::data(vec![0x00, 0x1b, 0x5b, 0x41, 0xff]));
    print_test_vector(
        "window_size_default",
        &Frame::window_size(WindowSize::new(80, 24)),
    );
    print_test_vector(
        "window_size_wide",
        &Frame::window_size(WindowSize::new(300, 100)),
    );
    print_test_vector(
        "window_size_short",
        &Frame::new(FrameType::WindowSize, vec![0, 0, 0, 80]),
    );
    print_test_vector(
        "reserved_type",
        &Frame::new(FrameType::Unknown(0xFF), b"future".to_vec()),
    );
}

fn print_test_vector(name: &str, frame: &Frame) {
    let codec = FrameCodec::new();
    let bytes = codec.encode(frame).expect("test vector frames are small");
    let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();

    println!("// {}", name);
    println!(
        "// type=0x{:02x} payload_len={}",
        frame.frame_type.as_byte(),
        frame.payload.len()
    );
    println!("{}", hex);
    println!();
}
