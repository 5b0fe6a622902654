use gmss_hypertree::{generate as gmss_generate, Parameters, PrivateKey, PublicKey};
use rand::rngs::OsRng;
use std::env::args;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::exit;

fn usage(arg0: &String, other: &str) {
    println!("usage: {} <cmd>{}", arg0, other);
    exit(1);
}

const SK_MAGIC: &[u8; 4] = b"GMS1";
const PK_MAGIC: &[u8; 4] = b"GMP1";

fn magic_check(file: &mut File, magic: &[u8; 4]) {
    let mut read = [0u8; 4];
    file.read_exact(&mut read)
        .expect("I/O trying to read magic");
    assert_eq!(&read, magic)
}

fn read_payload<P: AsRef<Path>>(path: P, magic: &[u8; 4]) -> Vec<u8> {
    let mut v = Vec::new();
    let mut f = OpenOptions::new()
        .read(true)
        .open(path)
        .expect("cannot open file for reading");
    magic_check(&mut f, magic);
    f.read_to_end(&mut v).expect("I/O error reading file");
    v
}

fn write_payload<P: AsRef<Path>>(path: P, magic: &[u8; 4], payload: &[u8]) {
    let mut f = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .expect("cannot create file");
    f.write_all(magic).expect("cannot write magic");
    f.write_all(payload).expect("I/O error writing file");
}

fn sk_read<P: AsRef<Path>>(path: P) -> PrivateKey {
    let v = read_payload(path, SK_MAGIC);
    serde_cbor::from_slice(&v).expect("not a valid hypertree secret key")
}

/// Replace the key file through a temporary file, so that an interrupted write never
/// leaves a key with an already used leaf behind.
fn sk_replace(file: &str, sk: &PrivateKey) {
    let mut tmpfile = PathBuf::from(file);
    match tmpfile.file_name() {
        None => assert!(false),
        Some(fname) => {
            let mut tmp_filename = std::ffi::OsString::new();
            tmp_filename.push(fname);
            tmp_filename.push(".tmp");
            tmpfile.set_file_name(tmp_filename);
        }
    }
    let payload = serde_cbor::to_vec(sk).expect("cannot encode secret key");
    write_payload(&tmpfile, SK_MAGIC, &payload);
    std::fs::rename(tmpfile, file).expect("cannot rename file");
}

fn pk_file(file: &str) -> String {
    format!("{}.pub", file)
}

fn generate(arg0: &String, args: &[String]) {
    if args.len() < 2 {
        usage(arg0, " <file> <log2 of the number of signatures>")
    }
    let file = &args[0];
    let capacity = args[1]
        .parse::<u32>()
        .expect("cannot convert argument to integer");

    let params = match Parameters::preset(capacity) {
        Ok(params) => params,
        Err(e) => {
            eprintln!("{}", e);
            exit(1);
        }
    };

    eprintln!("generating key ...");
    let (sk, pk): (PrivateKey, PublicKey) =
        gmss_generate(&mut OsRng, &params).expect("key generation failed");

    println!("public key : {}", hex::encode(pk.as_bytes()));

    let sk_payload = serde_cbor::to_vec(&sk).expect("cannot encode secret key");
    write_payload(file, SK_MAGIC, &sk_payload);
    let pk_payload = serde_cbor::to_vec(&pk).expect("cannot encode public key");
    write_payload(pk_file(file), PK_MAGIC, &pk_payload);
}

fn info(arg0: &String, args: &[String]) {
    if args.is_empty() {
        usage(arg0, " <file>")
    }

    let sk = sk_read(&args[0]);

    println!("index      : {}", sk.index());
    println!("remaining  : {}", sk.remaining());
    println!("public key : {}", hex::encode(sk.public_key().as_bytes()));
    println!("layers");
    for (i, layer) in sk.params().layers().iter().enumerate() {
        println!(
            "  {} : height {:2}  w {:2}  k {:2}",
            i, layer.height, layer.winternitz, layer.k
        );
    }
}

fn sign(arg0: &String, args: &[String]) {
    if args.len() < 2 {
        usage(arg0, " <file> <message>")
    }

    let file = &args[0];
    let mut sk = sk_read(file);

    let signature = match sk.sign(args[1].as_bytes()) {
        Ok(signature) => signature,
        Err(e) => {
            eprintln!("cannot sign: {}", e);
            return;
        }
    };

    sk_replace(file, &sk);
    println!("{}", hex::encode(signature.to_bytes()));
}

fn verify(arg0: &String, args: &[String]) {
    if args.len() < 3 {
        usage(arg0, " <public key file> <message> <signature>")
    }

    let v = read_payload(&args[0], PK_MAGIC);
    let pk: PublicKey = serde_cbor::from_slice(&v).expect("not a valid hypertree public key");
    let signature = hex::decode(&args[2]).expect("signature is not hexadecimal");

    if pk.verify_bytes(args[1].as_bytes(), &signature) {
        println!("valid");
    } else {
        println!("invalid");
        exit(1);
    }
}

pub fn main() {
    let args = args().collect::<Vec<_>>();
    if args.len() < 2 {
        usage(&args[0], "")
    }

    match args[1].as_ref() {
        "generate" => generate(&args[0], &args[2..]),
        "info" => info(&args[0], &args[2..]),
        "sign" => sign(&args[0], &args[2..]),
        "verify" => verify(&args[0], &args[2..]),
        s => println!("error: unknown command {}", s),
    }
}
