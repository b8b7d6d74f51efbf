fn main() {
    for input in [&b"<pulp_image_manifest><image"[..], b"not xml at all"].iter() {
        let mut reader = quick_xml::Reader::from_reader(*input);
        reader.trim_text(true);
        let mut buf = Vec::new();
        println!("=== input: {:?}", String::from_utf8_lossy(input));
        loop {
            match reader.read_event_into(&mut buf) {
                Err(e) => { println!("  ERR: {e}"); break; }
                Ok(quick_xml::events::Event::Eof) => { println!("  EOF"); break; }
                Ok(ev) => println!("  ev: {:?}", ev),
            }
            buf.clear();
        }
    }
}
