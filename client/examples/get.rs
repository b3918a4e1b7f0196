//! Fetch a url over plain http and print status, headers and body size.
//!
//! ```sh
//! cargo run --example get -- example.com /
//! ```

use std::env;

use lamprey_client::{Connection, Error, Operation, RequestBody, TlsConnector};

fn main() -> Result<(), Error> {
    let mut args = env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "example.com".to_owned());
    let path = args.next().unwrap_or_else(|| "/".to_owned());

    let mut conn = Connection::new(host, None, TlsConnector::Off, None);

    conn.send_request("GET", &path, None, RequestBody::Empty, false)
        .wait()?;

    let res = conn.read_response().wait()?;
    println!("{} {}", res.status(), res.reason());
    for (name, value) in res.headers() {
        println!("{name}: {value}");
    }

    let body = conn.read_all().wait()?;
    println!("\n({} body bytes)", body.len());

    Ok(())
}
