use dds_crypto::CryptoError;
use dds_deliver::DeliveryError;

#[test]
fn setup_errors_are_fatal() {
    assert!(DeliveryError::Validation("x".into()).is_fatal());
    assert!(DeliveryError::Access("x".into()).is_fatal());
    assert!(DeliveryError::Config("x".into()).is_fatal());
}

#[test]
fn per_file_errors_are_not_fatal() {
    let errors = [
        DeliveryError::Consistency("x".into()),
        DeliveryError::Exists("x".into()),
        DeliveryError::Format("x".into()),
        DeliveryError::Crypto("x".into()),
        DeliveryError::Io(std::io::Error::other("x")),
        DeliveryError::Store("x".into()),
        DeliveryError::InvalidTransition("x".into()),
        DeliveryError::Interrupted,
    ];
    for err in errors {
        assert!(!err.is_fatal(), "{err}");
    }
}

#[test]
fn crypto_errors_map_onto_the_delivery_taxonomy() {
    let format: DeliveryError = CryptoError::Format("bad magic".into()).into();
    assert!(matches!(format, DeliveryError::Format(_)));

    let auth: DeliveryError = CryptoError::Authentication("block 3".into()).into();
    assert!(matches!(auth, DeliveryError::Crypto(_)));

    let no_packet: DeliveryError = CryptoError::NoMatchingPacket.into();
    assert!(matches!(no_packet, DeliveryError::Crypto(_)));

    let io: DeliveryError = CryptoError::Io(std::io::Error::other("disk")).into();
    assert!(matches!(io, DeliveryError::Io(_)));
}

#[test]
fn display_messages() {
    assert_eq!(
        DeliveryError::Validation("no data specified".into()).to_string(),
        "invalid input: no data specified"
    );
    assert_eq!(DeliveryError::Interrupted.to_string(), "delivery interrupted");
    assert_eq!(
        DeliveryError::Consistency("p/a exists in storage but is not registered".into())
            .to_string(),
        "p/a exists in storage but is not registered"
    );
}
