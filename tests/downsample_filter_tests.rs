use proptest::prelude::*;

use spanscan::codec::{encode_qualifier, qualifier_delta};
use spanscan::downsample::SERIALIZED_LEN;
use spanscan::{Cell, DownsampleFilter, FilterDecision};

fn cell(row: &[u8], delta: u16) -> Cell {
    Cell::new(row.to_vec(), b"t".to_vec(), encode_qualifier(delta, 0).to_vec(), vec![0])
}

fn hint_delta(filter: &DownsampleFilter, current: &Cell) -> Option<u16> {
    filter
        .next_cell_hint(current)
        .map(|h| qualifier_delta(u16::from_be_bytes([h.qualifier[0], h.qualifier[1]])))
}

#[test]
fn interval_three_over_consecutive_deltas() {
    let mut f = DownsampleFilter::new(&[0, 0, 0, 3]).unwrap();
    let mut seen = Vec::new();
    for d in 0..7u16 {
        let c = cell(b"row", d);
        let decision = f.filter_cell(&c);
        let hint = match decision {
            FilterDecision::SeekNextUsingHint => hint_delta(&f, &c),
            _ => None,
        };
        seen.push((decision, hint));
    }
    use FilterDecision::*;
    assert_eq!(
        seen,
        vec![
            (Include, None),
            (SeekNextUsingHint, Some(3)),
            (Skip, None),
            (Include, None),
            (SeekNextUsingHint, Some(6)),
            (Skip, None),
            (Include, None),
        ]
    );
}

#[test]
fn hint_stays_in_row_and_family() {
    let mut f = DownsampleFilter::with_interval(60);
    let c = Cell::new(b"key-1".to_vec(), b"fam".to_vec(), encode_qualifier(5, 0x7).to_vec(), vec![0; 8]);
    assert_eq!(f.filter_cell(&c), FilterDecision::Include);
    let next = Cell::new(b"key-1".to_vec(), b"fam".to_vec(), encode_qualifier(6, 0).to_vec(), vec![0]);
    assert_eq!(f.filter_cell(&next), FilterDecision::SeekNextUsingHint);
    let hint = f.next_cell_hint(&next).unwrap();
    assert_eq!(hint.key, b"key-1");
    assert_eq!(hint.family, b"fam");
    assert_eq!(hint.qualifier, encode_qualifier(65, 0).to_vec());
    assert!(hint.value.is_empty());
}

#[test]
fn reset_makes_the_filter_reusable_across_rows() {
    let mut f = DownsampleFilter::with_interval(10);
    for d in [0u16, 4, 10, 11] {
        f.filter_cell(&cell(b"a", d));
    }
    f.reset();
    assert_eq!(f.filter_cell(&cell(b"b", 2)), FilterDecision::Include);
    assert_eq!(f.filter_cell(&cell(b"b", 3)), FilterDecision::SeekNextUsingHint);
    assert_eq!(hint_delta(&f, &cell(b"b", 3)), Some(12));
}

#[test]
fn serialized_definition_is_bit_exact() {
    let bytes = DownsampleFilter::with_interval(3600).to_bytes();
    assert_eq!(bytes.len(), SERIALIZED_LEN);
    let mut expected = vec![36u8];
    expected.extend_from_slice(b"net.opentsdb.filter.DownsampleFilter");
    expected.extend_from_slice(&[4, 0, 0, 0x0E, 0x10]);
    assert_eq!(bytes.to_vec(), expected);
}

#[test]
fn deserialized_filter_starts_fresh() {
    let mut f = DownsampleFilter::with_interval(5);
    f.filter_cell(&cell(b"r", 0));
    let back = DownsampleFilter::from_bytes(&f.to_bytes()).unwrap();
    assert_eq!(back, DownsampleFilter::with_interval(5));
}

proptest! {
    #[test]
    fn prop_round_trip_preserves_interval(interval in any::<u32>()) {
        let f = DownsampleFilter::with_interval(interval);
        let back = DownsampleFilter::from_bytes(&f.to_bytes()).unwrap();
        prop_assert_eq!(back.interval(), interval);
        prop_assert_eq!(back, f);
    }

    #[test]
    fn prop_included_cells_are_spaced_by_interval(
        interval in 1u32..200,
        deltas in prop::collection::btree_set(0u16..4096, 1..100),
    ) {
        let mut f = DownsampleFilter::with_interval(interval);
        let mut last: Option<u16> = None;
        for d in deltas {
            if f.filter_cell(&cell(b"r", d)) == FilterDecision::Include {
                if let Some(prev) = last {
                    prop_assert!((d - prev) as u32 >= interval);
                }
                last = Some(d);
            }
        }
        prop_assert!(last.is_some());
    }
}
