// Author: Lukas Bower
// Purpose: Check 9P2000 frame layouts against hand-assembled bytes.

use gate9p_codec::{
    decode_request, decode_response, encode_request, encode_response, FileMode, OpenMode, Qid,
    QidType, Request, RequestBody, Response, ResponseBody, NOFID, NOTAG, VERSION,
};

#[test]
fn tversion_matches_reference_bytes() {
    let frame = encode_request(&Request {
        tag: NOTAG,
        body: RequestBody::Version {
            msize: 8192,
            version: VERSION.to_owned(),
        },
    })
    .expect("encode");
    let expected: Vec<u8> = [
        &[19u8, 0, 0, 0, 100, 0xff, 0xff][..],
        &8192u32.to_le_bytes(),
        &[6, 0],
        b"9P2000",
    ]
    .concat();
    assert_eq!(frame, expected);
}

#[test]
fn tattach_has_no_numeric_uname() {
    let frame = encode_request(&Request {
        tag: 1,
        body: RequestBody::Attach {
            fid: 0,
            afid: NOFID,
            uname: "ann".to_owned(),
            aname: String::new(),
        },
    })
    .expect("encode");
    // size tag fid afid uname[2+3] aname[2]
    assert_eq!(frame.len(), 4 + 1 + 2 + 4 + 4 + 5 + 2);
    assert_eq!(frame[4], 104);
}

#[test]
fn rwalk_decodes_qids_from_bytes() {
    let mut bytes = vec![0u8, 0, 0, 0, 111, 3, 0, 1, 0];
    bytes.push(0x80);
    bytes.extend_from_slice(&5u32.to_le_bytes());
    bytes.extend_from_slice(&0x0102_0304_0506_0708u64.to_le_bytes());
    let len = bytes.len() as u32;
    bytes[..4].copy_from_slice(&len.to_le_bytes());
    let response = decode_response(&bytes).expect("decode");
    assert_eq!(response.tag, 3);
    assert_eq!(
        response.body,
        ResponseBody::Walk {
            qids: vec![Qid::new(QidType::DIRECTORY, 5, 0x0102_0304_0506_0708)],
        }
    );
}

#[test]
fn rerror_carries_ename_only() {
    let frame = encode_response(&Response {
        tag: 4,
        body: ResponseBody::Error {
            ename: "file not found".to_owned(),
        },
    })
    .expect("encode");
    assert_eq!(frame[4], 107);
    assert_eq!(&frame[7..9], &[14, 0]);
    assert_eq!(&frame[9..], b"file not found");
}

#[test]
fn rstat_nests_the_stat_record() {
    let stat = gate9p_codec::Stat {
        ty: 0,
        dev: 0,
        qid: Qid::new(QidType::FILE, 1, 9),
        mode: FileMode::from_bits(0o700),
        atime: 1,
        mtime: 1,
        length: 5,
        name: "f".to_owned(),
        uid: "u".to_owned(),
        gid: "u".to_owned(),
        muid: "u".to_owned(),
    };
    let frame = encode_response(&Response {
        tag: 2,
        body: ResponseBody::Stat { stat: stat.clone() },
    })
    .expect("encode");
    let outer = u16::from_le_bytes([frame[7], frame[8]]) as usize;
    let inner = u16::from_le_bytes([frame[9], frame[10]]) as usize;
    assert_eq!(outer, inner + 2);
    assert_eq!(frame.len(), 9 + outer);
    let decoded = decode_response(&frame).expect("decode");
    assert_eq!(decoded.body, ResponseBody::Stat { stat });
}

#[test]
fn topen_mode_bits_survive_decoding() {
    let frame = encode_request(&Request {
        tag: 5,
        body: RequestBody::Open {
            fid: 3,
            mode: OpenMode::read_write().truncating(),
        },
    })
    .expect("encode");
    assert_eq!(frame[frame.len() - 1], 0x12);
    let decoded = decode_request(&frame).expect("decode");
    let RequestBody::Open { mode, .. } = decoded.body else {
        panic!("expected Topen");
    };
    assert!(mode.allows_read() && mode.allows_write() && mode.is_truncate());
}
