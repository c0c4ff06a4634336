// Copyright 2024 LEXUGE
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

use criterion::{criterion_group, criterion_main, Criterion};
use dsuffix::SuffixMap;

fn bench_lookup(c: &mut Criterion) {
    let mut map = SuffixMap::new();
    for i in 0..10_000u32 {
        map.insert(&format!("sub{}.example{}.com", i, i % 977), i);
    }
    map.insert("baidu.com", u32::MAX);

    c.bench_function("lookup", |b| {
        b.iter(|| {
            assert_eq!(
                map.lookup("store.www.baidu.com"),
                Some(("baidu.com.", &u32::MAX))
            )
        })
    });
}

criterion_group!(benches, bench_lookup);
criterion_main!(benches);
